mod serialization;
mod serializer;

pub use serialization::*;
pub use serializer::*;

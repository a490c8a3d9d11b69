use std::io::Write;

use crate::binary::{Serialize, Serializer};

/// A method whose code has not been placed in the image yet.
///
/// The welder turns these into [`MethodEntry`]s once it knows where each
/// method's code lands.
#[derive(Debug, Clone)]
pub struct UnlinkedMethod {
    /// Index into the symbol table.
    pub symbol: u32,
    pub local_count: u16,
    pub code: Vec<u8>,
}

/// A method table row as it appears in the image.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub symbol: u32,
    pub local_count: u16,
    pub code_offset: u32,
    pub code_len: u32,
}

impl Serialize for MethodEntry {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.symbol.serialize(serializer)?;
        self.local_count.serialize(serializer)?;
        self.code_offset.serialize(serializer)?;
        self.code_len.serialize(serializer)?;
        Ok(())
    }
}

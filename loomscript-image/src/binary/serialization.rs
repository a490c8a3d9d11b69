use std::io::{Cursor, Write};

use anyhow::Context;
use uuid::Uuid;

use super::Serializer;

/// Types that can be written out in the image's binary encoding.
///
/// All multi-byte integers are little-endian. Strings and arrays carry a
/// `u32` length prefix.
pub trait Serialize {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()>;
}

impl Serialize for () {
    fn serialize(&self, _: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        Ok(())
    }
}

macro_rules! serialize_primitive_le {
    ($T:ty) => {
        impl Serialize for $T {
            fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
                serializer.write_bytes(&self.to_le_bytes())?;
                Ok(())
            }
        }
    };
}

serialize_primitive_le!(u8);
serialize_primitive_le!(u16);
serialize_primitive_le!(u32);
serialize_primitive_le!(u64);

serialize_primitive_le!(i8);
serialize_primitive_le!(i16);
serialize_primitive_le!(i32);
serialize_primitive_le!(i64);

impl Serialize for str {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        let len: u32 = self
            .len()
            .try_into()
            .context("string is too long to serialize")?;
        len.serialize(serializer)?;
        serializer.write_bytes(self.as_bytes())?;
        Ok(())
    }
}

impl Serialize for String {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.as_str().serialize(serializer)
    }
}

impl<T> Serialize for Vec<T>
where
    T: Serialize,
{
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        let len: u32 = self
            .len()
            .try_into()
            .context("cannot serialize length of array")?;
        len.serialize(serializer)?;
        for (i, element) in self.iter().enumerate() {
            element
                .serialize(serializer)
                .with_context(|| format!("cannot serialize array element at index {i}"))?;
        }
        Ok(())
    }
}

impl Serialize for Uuid {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        serializer.write_bytes(&self.to_bytes_le())?;
        Ok(())
    }
}

/// Serializes a single value into a fresh byte buffer.
pub fn serialize(value: &impl Serialize) -> anyhow::Result<Vec<u8>> {
    let mut buffer = vec![];
    value.serialize(&mut Serializer::new(Cursor::new(&mut buffer)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::serialize;

    #[test]
    fn strings_are_length_prefixed() {
        let bytes = serialize(&String::from("loom")).unwrap();
        assert_eq!(bytes, [4, 0, 0, 0, b'l', b'o', b'o', b'm']);
    }

    #[test]
    fn arrays_are_length_prefixed() {
        let bytes = serialize(&vec![1_u16, 2, 3]).unwrap();
        assert_eq!(bytes, [3, 0, 0, 0, 1, 0, 2, 0, 3, 0]);
    }
}

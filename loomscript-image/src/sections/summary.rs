use std::io::Write;

use anyhow::{bail, Context};
use bitflags::bitflags;
use uuid::Uuid;

use crate::{
    binary::{Serialize, Serializer},
    format,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageFlags: u32 {
        /// The module is a library of symbols for other modules to import.
        const LIBRARY        = 0x1;
        /// The module is a runnable program with an entry point.
        const PROGRAM        = 0x2;
        /// The image carries declarations only; the code segment is empty.
        const METADATA_ONLY  = 0x4;
        /// A debug section is embedded at the end of the image.
        const EMBEDDED_DEBUG = 0x8;
        /// Method code contains coverage instrumentation points.
        const COVERAGE       = 0x10;
    }
}

impl Serialize for ImageFlags {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.bits().serialize(serializer)
    }
}

/// The fixed-layout header at the start of every image.
///
/// Offsets are absolute within the image. The summary is serialized twice
/// during welding - provisionally, then again once all offsets are known -
/// so its serialized size must not depend on anything that changes between
/// the two passes.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub flags: ImageFlags,
    pub uuid: Uuid,
    pub module_name: String,

    pub name_table_len: u32,
    pub name_table_offset: u32,
    pub symbol_table_len: u32,
    pub symbol_table_offset: u32,
    pub method_table_len: u32,
    pub method_table_offset: u32,
    pub resource_table_len: u32,
    pub resource_table_offset: u32,

    pub code_offset: u32,
    pub code_len: u32,
    pub doc_offset: u32,
    pub doc_len: u32,
    pub debug_offset: u32,
    pub debug_len: u32,

    /// Size of everything before the code segment.
    pub headers_size: u32,
}

impl Serialize for Summary {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        format::IMAGE_MAGIC.serialize(serializer)?;
        format::IMAGE_FORMAT_VERSION.serialize(serializer)?;
        self.flags.serialize(serializer)?;
        self.uuid.serialize(serializer)?;
        self.module_name.serialize(serializer)?;

        self.name_table_len.serialize(serializer)?;
        self.name_table_offset.serialize(serializer)?;
        self.symbol_table_len.serialize(serializer)?;
        self.symbol_table_offset.serialize(serializer)?;
        self.method_table_len.serialize(serializer)?;
        self.method_table_offset.serialize(serializer)?;
        self.resource_table_len.serialize(serializer)?;
        self.resource_table_offset.serialize(serializer)?;

        self.code_offset.serialize(serializer)?;
        self.code_len.serialize(serializer)?;
        self.doc_offset.serialize(serializer)?;
        self.doc_len.serialize(serializer)?;
        self.debug_offset.serialize(serializer)?;
        self.debug_len.serialize(serializer)?;

        self.headers_size.serialize(serializer)?;
        Ok(())
    }
}

impl Summary {
    /// Reads a summary back from the front of an image.
    pub fn parse(bytes: &[u8]) -> anyhow::Result<Summary> {
        let mut reader = Reader { bytes, position: 0 };

        let magic = reader.read_u32().context("cannot read image magic")?;
        if magic != format::IMAGE_MAGIC {
            bail!("not a module image (bad magic {magic:#010x})");
        }
        let version = reader.read_u16().context("cannot read format version")?;
        if version != format::IMAGE_FORMAT_VERSION {
            bail!(
                "unsupported format version {version} (expected {})",
                format::IMAGE_FORMAT_VERSION
            );
        }

        let flags = ImageFlags::from_bits_retain(reader.read_u32()?);
        let uuid = Uuid::from_bytes_le(
            reader
                .read_bytes(16)?
                .try_into()
                .expect("read_bytes returned a slice of the wrong length"),
        );
        let name_len = reader.read_u32()? as usize;
        let module_name = std::str::from_utf8(reader.read_bytes(name_len)?)
            .context("module name is not valid UTF-8")?
            .to_owned();

        Ok(Summary {
            flags,
            uuid,
            module_name,
            name_table_len: reader.read_u32()?,
            name_table_offset: reader.read_u32()?,
            symbol_table_len: reader.read_u32()?,
            symbol_table_offset: reader.read_u32()?,
            method_table_len: reader.read_u32()?,
            method_table_offset: reader.read_u32()?,
            resource_table_len: reader.read_u32()?,
            resource_table_offset: reader.read_u32()?,
            code_offset: reader.read_u32()?,
            code_len: reader.read_u32()?,
            doc_offset: reader.read_u32()?,
            doc_len: reader.read_u32()?,
            debug_offset: reader.read_u32()?,
            debug_len: reader.read_u32()?,
            headers_size: reader.read_u32()?,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn read_bytes(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        let end = self.position.checked_add(len).context("offset overflow")?;
        if end > self.bytes.len() {
            bail!("image is truncated (wanted {len} bytes at {})", self.position);
        }
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> anyhow::Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> anyhow::Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageFlags, Summary};
    use crate::binary::serialize;

    #[test]
    fn parse_reads_back_what_serialize_wrote() {
        let summary = Summary {
            flags: ImageFlags::LIBRARY | ImageFlags::COVERAGE,
            uuid: uuid::Uuid::new_v4(),
            module_name: "geometry".into(),
            name_table_len: 7,
            name_table_offset: 100,
            code_offset: 400,
            code_len: 64,
            headers_size: 400,
            ..Default::default()
        };
        let bytes = serialize(&summary).unwrap();
        let parsed = Summary::parse(&bytes).unwrap();
        assert_eq!(parsed.flags, summary.flags);
        assert_eq!(parsed.uuid, summary.uuid);
        assert_eq!(parsed.module_name, summary.module_name);
        assert_eq!(parsed.name_table_len, 7);
        assert_eq!(parsed.code_offset, 400);
        assert_eq!(parsed.code_len, 64);
    }

    #[test]
    fn parse_rejects_other_formats() {
        assert!(Summary::parse(b"\x7fELF everything else").is_err());
    }
}

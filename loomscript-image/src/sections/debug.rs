use std::io::Write;

use anyhow::Context;

use crate::{
    binary::{Serialize, Serializer},
    format,
};

/// Source mapping for one method. `method` indexes the method table,
/// `file` indexes [`DebugInfo::files`].
#[derive(Debug, Clone)]
pub struct MethodDebug {
    pub method: u32,
    pub file: u32,
    pub span_start: u32,
    pub span_end: u32,
}

impl Serialize for MethodDebug {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.method.serialize(serializer)?;
        self.file.serialize(serializer)?;
        self.span_start.serialize(serializer)?;
        self.span_end.serialize(serializer)?;
        Ok(())
    }
}

/// The debug section: source file names plus per-method source spans.
///
/// Either embedded at the end of an image or written as a standalone stream
/// with its own magic, depending on the debug-info mode.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub files: Vec<String>,
    pub methods: Vec<MethodDebug>,
}

impl Serialize for DebugInfo {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.files
            .serialize(serializer)
            .context("cannot serialize debug file names")?;
        self.methods
            .serialize(serializer)
            .context("cannot serialize method debug entries")?;
        Ok(())
    }
}

impl DebugInfo {
    /// Writes the debug section as a standalone stream, magic first.
    pub fn write_stream(&self, writer: impl Write) -> anyhow::Result<()> {
        let mut serializer = Serializer::new(writer);
        format::DEBUG_MAGIC
            .serialize(&mut serializer)
            .context("cannot serialize debug stream magic")?;
        format::DEBUG_FORMAT_VERSION
            .serialize(&mut serializer)
            .context("cannot serialize debug stream version")?;
        self.serialize(&mut serializer)
    }
}

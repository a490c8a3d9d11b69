use std::io::Write;

use crate::binary::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    Const = 0,
    Function = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolVisibility {
    Public = 0,
    Private = 1,
}

/// One declared symbol. `name` and `namespace` index the name table.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: u32,
    pub namespace: u32,
    pub class: SymbolClass,
    pub visibility: SymbolVisibility,
    pub param_count: u16,
}

impl Serialize for SymbolEntry {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.name.serialize(serializer)?;
        self.namespace.serialize(serializer)?;
        (self.class as u8).serialize(serializer)?;
        (self.visibility as u8).serialize(serializer)?;
        self.param_count.serialize(serializer)?;
        Ok(())
    }
}

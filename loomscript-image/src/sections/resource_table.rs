use std::io::Write;

use crate::binary::{Serialize, Serializer};

/// An embedded resource blob. `name` indexes the name table.
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub name: u32,
    pub data: Vec<u8>,
}

impl Serialize for ResourceEntry {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.name.serialize(serializer)?;
        self.data.serialize(serializer)?;
        Ok(())
    }
}

use std::{collections::HashMap, io::Write};

use crate::binary::{Serialize, Serializer};

/// Interned strings referenced by index from the other tables.
///
/// Indices are stable: interning never moves or removes entries, so an index
/// handed out once stays valid for the lifetime of the table.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    pub entries: Vec<String>,
    indices_by_name: HashMap<String, u32>,
}

impl NameTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.indices_by_name.get(name) {
            index
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(name.to_owned());
            self.indices_by_name.insert(name.to_owned(), index);
            index
        }
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(|x| x.as_str())
    }
}

impl Serialize for NameTable {
    fn serialize(&self, serializer: &mut Serializer<impl Write>) -> anyhow::Result<()> {
        self.entries.serialize(serializer)
    }
}

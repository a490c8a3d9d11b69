use std::io::Cursor;

use anyhow::Context;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    binary::{Serialize, Serializer},
    sections::{
        DebugInfo, ImageFlags, MethodEntry, NameTable, ResourceEntry, Summary, SymbolEntry,
        UnlinkedMethod,
    },
};

/// Image welder. Assembles a module image from unlinked raw parts.
///
/// Welding is a full, independent write every time: the same welder input
/// produces the same bytes, and nothing about a previous weld leaks into the
/// next one.
pub struct Welder<'a> {
    pub module_name: &'a str,
    pub flags: ImageFlags,
    pub uuid: Uuid,
    pub names: &'a NameTable,
    pub symbols: &'a [SymbolEntry],
    pub methods: &'a [UnlinkedMethod],
    pub resources: &'a [ResourceEntry],
    /// Embedded into the image when the flags say so; ignored for
    /// metadata-only images.
    pub debug: Option<&'a DebugInfo>,
    pub docs: Option<&'a str>,
}

impl<'a> Welder<'a> {
    pub fn weld(self) -> anyhow::Result<Vec<u8>> {
        let metadata_only = self.flags.contains(ImageFlags::METADATA_ONLY);

        let mut summary = Summary {
            flags: self.flags,
            uuid: self.uuid,
            module_name: self.module_name.to_owned(),
            name_table_len: self.names.entries.len() as u32,
            symbol_table_len: self.symbols.len() as u32,
            method_table_len: self.methods.len() as u32,
            resource_table_len: self.resources.len() as u32,
            ..Default::default()
        };

        let mut result = Vec::new();
        let mut cursor = Cursor::new(&mut result);

        summary
            .serialize(&mut Serializer::new(&mut cursor))
            .context("cannot serialize initial summary")?;

        summary.name_table_offset = position(&cursor)?;
        self.names
            .serialize(&mut Serializer::new(&mut cursor))
            .context("cannot serialize name table")?;

        summary.symbol_table_offset = position(&cursor)?;
        for symbol in self.symbols {
            symbol
                .serialize(&mut Serializer::new(&mut cursor))
                .context("cannot serialize symbol table entry")?;
        }

        // The method table is serialized with zeroed code offsets first and
        // fixed up once the code segment is in place.
        let mut entries: Vec<_> = self
            .methods
            .iter()
            .map(|unlinked| MethodEntry {
                symbol: unlinked.symbol,
                local_count: unlinked.local_count,
                code_offset: 0,
                code_len: if metadata_only {
                    0
                } else {
                    unlinked.code.len() as u32
                },
            })
            .collect();

        let method_table_offset = cursor.position();
        summary.method_table_offset = position(&cursor)?;
        for entry in &entries {
            entry
                .serialize(&mut Serializer::new(&mut cursor))
                .context("cannot serialize method table entry")?;
        }

        summary.resource_table_offset = position(&cursor)?;
        for resource in self.resources {
            resource
                .serialize(&mut Serializer::new(&mut cursor))
                .context("cannot serialize resource table entry")?;
        }

        summary.headers_size = position(&cursor)?;

        if !metadata_only {
            summary.code_offset = position(&cursor)?;
            for (unlinked, entry) in self.methods.iter().zip(&mut entries) {
                entry.code_offset = position(&cursor)?;
                Serializer::new(&mut cursor)
                    .write_bytes(&unlinked.code)
                    .context("cannot serialize method code")?;
            }
            summary.code_len = position(&cursor)? - summary.code_offset;
        }

        if let Some(docs) = self.docs {
            summary.doc_offset = position(&cursor)?;
            Serializer::new(&mut cursor)
                .write_bytes(docs.as_bytes())
                .context("cannot serialize documentation text")?;
            summary.doc_len = position(&cursor)? - summary.doc_offset;
        }

        if !metadata_only {
            if let Some(debug) = self.debug {
                summary.debug_offset = position(&cursor)?;
                debug
                    .serialize(&mut Serializer::new(&mut cursor))
                    .context("cannot serialize embedded debug section")?;
                summary.debug_len = position(&cursor)? - summary.debug_offset;
            }
        }

        // Serialize the method table again to fill in code offsets.
        cursor.set_position(method_table_offset);
        for entry in &entries {
            entry
                .serialize(&mut Serializer::new(&mut cursor))
                .context("cannot serialize method table entry")?;
        }

        // Go back to the beginning to serialize the summary again, which now
        // contains up to date offsets.
        cursor.set_position(0);
        summary
            .serialize(&mut Serializer::new(&mut cursor))
            .context("cannot serialize final summary")?;

        debug!(
            image_size = result.len(),
            methods = self.methods.len(),
            metadata_only,
            "welded module image"
        );
        Ok(result)
    }
}

fn position(cursor: &Cursor<&mut Vec<u8>>) -> Result<u32, Error> {
    cursor.position().try_into().map_err(|_| Error::ImageTooBig)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("image is too big (its size exceeds the 32-bit offset limit)")]
    ImageTooBig,
}

#[cfg(test)]
mod tests {
    use super::Welder;
    use crate::sections::{
        DebugInfo, ImageFlags, MethodDebug, NameTable, ResourceEntry, Summary, SymbolClass,
        SymbolEntry, SymbolVisibility, UnlinkedMethod,
    };
    use uuid::Uuid;

    fn sample_welder(names: &mut NameTable) -> (Vec<SymbolEntry>, Vec<UnlinkedMethod>) {
        let name = names.intern("answer");
        let namespace = names.intern("trivia");
        let symbols = vec![SymbolEntry {
            name,
            namespace,
            class: SymbolClass::Function,
            visibility: SymbolVisibility::Public,
            param_count: 0,
        }];
        let methods = vec![UnlinkedMethod {
            symbol: 0,
            local_count: 0,
            code: vec![0x01, 0x2A, 0, 0, 0, 0, 0, 0, 0, 0x0A],
        }];
        (symbols, methods)
    }

    #[test]
    fn welding_twice_is_byte_identical() {
        let mut names = NameTable::new();
        let (symbols, methods) = sample_welder(&mut names);
        let uuid = Uuid::new_v4();
        let weld = || {
            Welder {
                module_name: "trivia",
                flags: ImageFlags::LIBRARY,
                uuid,
                names: &names,
                symbols: &symbols,
                methods: &methods,
                resources: &[],
                debug: None,
                docs: None,
            }
            .weld()
            .unwrap()
        };
        assert_eq!(weld(), weld());
    }

    #[test]
    fn summary_offsets_are_fixed_up() {
        let mut names = NameTable::new();
        let (symbols, methods) = sample_welder(&mut names);
        let resources = vec![ResourceEntry {
            name: names.intern("manifest"),
            data: b"hello".to_vec(),
        }];
        let image = Welder {
            module_name: "trivia",
            flags: ImageFlags::PROGRAM | ImageFlags::EMBEDDED_DEBUG,
            uuid: Uuid::new_v4(),
            names: &names,
            symbols: &symbols,
            methods: &methods,
            resources: &resources,
            debug: Some(&DebugInfo {
                files: vec!["Trivia.loom".into()],
                methods: vec![MethodDebug {
                    method: 0,
                    file: 0,
                    span_start: 0,
                    span_end: 10,
                }],
            }),
            docs: Some("## answer\nReturns the answer.\n"),
        }
        .weld()
        .unwrap();

        let summary = Summary::parse(&image).unwrap();
        assert_eq!(summary.module_name, "trivia");
        assert!(summary.code_offset >= summary.headers_size);
        assert_eq!(summary.code_len, methods[0].code.len() as u32);
        assert!(summary.doc_offset > summary.code_offset);
        assert!(summary.debug_offset > summary.doc_offset);
        assert_eq!(
            &image[summary.code_offset as usize..(summary.code_offset + summary.code_len) as usize],
            &methods[0].code[..],
        );
    }

    #[test]
    fn metadata_only_images_have_no_code_segment() {
        let mut names = NameTable::new();
        let (symbols, methods) = sample_welder(&mut names);
        let image = Welder {
            module_name: "trivia",
            flags: ImageFlags::LIBRARY | ImageFlags::METADATA_ONLY,
            uuid: Uuid::new_v4(),
            names: &names,
            symbols: &symbols,
            methods: &methods,
            resources: &[],
            debug: None,
            docs: None,
        }
        .weld()
        .unwrap();

        let summary = Summary::parse(&image).unwrap();
        assert!(summary.flags.contains(ImageFlags::METADATA_ONLY));
        assert_eq!(summary.code_len, 0);
        assert_eq!(image.len(), summary.headers_size as usize);
    }
}

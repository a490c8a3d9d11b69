//! Serialization of a finalized module into the caller's byte sinks.

use std::{
    collections::HashMap,
    io::{Cursor, Write},
};

use anyhow::Context;
use bitflags::bitflags;
use loomscript_foundation::{
    errors::{Diagnostic, Severity},
    source::SourceFileId,
};
use loomscript_image::{
    binary::{Serialize, Serializer},
    sections::{
        DebugInfo, ImageFlags, MethodDebug, NameTable, ResourceEntry, SymbolClass, SymbolEntry,
        SymbolVisibility, UnlinkedMethod,
    },
    welder::Welder,
};
use tracing::{debug, info_span};

use crate::{
    bind::{BoundDeclarations, SymbolId, SymbolKind, SymbolOrigin},
    ir::{CompiledMethod, Op},
    module::{ModuleArtifact, Stage},
    options::{DebugInfoMode, EmitOptions, OutputKind},
    sources::SourceSet,
    unit::Visibility,
    StateError,
};

/// Opcode bytes of the serialized code segment.
mod opcode {
    pub const PUSH_INT: u8 = 0x01;
    pub const PUSH_STR: u8 = 0x02;
    pub const LOAD_LOCAL: u8 = 0x03;
    pub const STORE_LOCAL: u8 = 0x04;
    pub const LOAD_SYMBOL: u8 = 0x05;
    pub const CALL: u8 = 0x06;
    pub const ADD: u8 = 0x10;
    pub const SUBTRACT: u8 = 0x11;
    pub const MULTIPLY: u8 = 0x12;
    pub const DIVIDE: u8 = 0x13;
    pub const POP: u8 = 0x20;
    pub const RETURN: u8 = 0x21;
    pub const RETURN_VOID: u8 = 0x22;
    pub const COVERAGE_POINT: u8 = 0x30;
}

bitflags! {
    /// Which sinks a serialization call actually wrote into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WrittenStreams: u32 {
        const IMAGE    = 0x1;
        const METADATA = 0x2;
        const DEBUG    = 0x4;
        const DOCS     = 0x8;
    }
}

/// The caller's byte sinks. Only `image` is required; everything else is
/// written when both the options ask for it and the sink is present.
///
/// The pipeline writes from each sink's current position forward and never
/// seeks; position and ownership management stay with the caller.
pub struct OutputStreams<'w> {
    pub image: &'w mut dyn Write,
    pub metadata: Option<&'w mut dyn Write>,
    pub debug: Option<&'w mut dyn Write>,
    pub docs: Option<&'w mut dyn Write>,
}

#[derive(Debug)]
pub struct SerializationResult {
    /// False when the module carries error-severity diagnostics (possible
    /// under the emit-anyway policy.) The streams are written either way.
    pub success: bool,
    /// Diagnostics appended during finalization.
    pub diagnostics: Vec<Diagnostic>,
    pub written: WrittenStreams,
}

/// Serializes a finalized module into `streams`.
///
/// Requires the artifact to be finalized; calling this on an open module is
/// an orchestration bug and fails before a single byte is written. Each
/// call is a full, independent write - callers may rewind their buffers and
/// serialize again, and two calls over the same artifact produce identical
/// primary images.
pub fn serialize(
    artifact: &mut ModuleArtifact,
    set: &SourceSet,
    streams: &mut OutputStreams<'_>,
    options: &EmitOptions,
) -> anyhow::Result<SerializationResult> {
    let _span = info_span!("serialize_module").entered();

    if artifact.stage() == Stage::Open {
        return Err(StateError::NotFinalized(Stage::Open).into());
    }
    let bound = set.bound_declarations();
    let mut written = WrittenStreams::empty();

    let module_name = options
        .output_name
        .as_deref()
        .unwrap_or_else(|| artifact.name());

    let embed_debug = options.debug_info == DebugInfoMode::Embedded && !options.metadata_only;
    let primary = flatten(artifact, bound, options, options.metadata_only)?;
    let primary_debug = embed_debug.then(|| build_debug(artifact.methods(), set));
    let image = Welder {
        module_name,
        flags: flags_for(set, options, options.metadata_only, embed_debug),
        uuid: artifact.uuid(),
        names: &primary.names,
        symbols: &primary.symbols,
        methods: &primary.methods,
        resources: &primary.resources,
        debug: primary_debug.as_ref(),
        docs: artifact.docs(),
    }
    .weld()
    .context("cannot weld primary image")?;
    streams
        .image
        .write_all(&image)
        .context("cannot write primary image")?;
    written |= WrittenStreams::IMAGE;

    if let Some(sink) = streams.metadata.as_mut() {
        let metadata = flatten(artifact, bound, options, true)?;
        let image = Welder {
            module_name,
            flags: flags_for(set, options, true, false),
            uuid: artifact.uuid(),
            names: &metadata.names,
            symbols: &metadata.symbols,
            methods: &metadata.methods,
            resources: &metadata.resources,
            debug: None,
            docs: None,
        }
        .weld()
        .context("cannot weld metadata image")?;
        sink.write_all(&image)
            .context("cannot write metadata image")?;
        written |= WrittenStreams::METADATA;
    }

    if options.debug_info == DebugInfoMode::Separate && !options.metadata_only {
        if let Some(sink) = streams.debug.as_mut() {
            build_debug(artifact.methods(), set)
                .write_stream(sink)
                .context("cannot write debug stream")?;
            written |= WrittenStreams::DEBUG;
        }
    }

    if let (Some(docs), Some(sink)) = (artifact.docs(), streams.docs.as_mut()) {
        sink.write_all(docs.as_bytes())
            .context("cannot write documentation stream")?;
        written |= WrittenStreams::DOCS;
    }

    artifact.mark_serialized()?;
    debug!(?written, "module serialized");

    let diagnostics = artifact.advisories().to_vec();
    let success = !bound.has_errors()
        && !diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity >= Severity::Error);
    Ok(SerializationResult {
        success,
        diagnostics,
        written,
    })
}

fn flags_for(
    set: &SourceSet,
    options: &EmitOptions,
    metadata_only: bool,
    embed_debug: bool,
) -> ImageFlags {
    let mut flags = match set.options().output_kind {
        OutputKind::Library => ImageFlags::LIBRARY,
        OutputKind::Program => ImageFlags::PROGRAM,
    };
    if metadata_only {
        flags |= ImageFlags::METADATA_ONLY;
    }
    if embed_debug {
        flags |= ImageFlags::EMBEDDED_DEBUG;
    }
    if options.instrument_coverage {
        flags |= ImageFlags::COVERAGE;
    }
    flags
}

struct Flattened {
    names: NameTable,
    symbols: Vec<SymbolEntry>,
    methods: Vec<UnlinkedMethod>,
    resources: Vec<ResourceEntry>,
}

/// Flattens the bound symbols and compiled methods into image tables.
///
/// The primary image carries every symbol the code references, external
/// ones included. A metadata-only flattening instead keeps just this
/// module's own declarations - public ones, or all of them when the
/// include-private option is set - and no code or resources, making it a
/// consistent subset of the primary image.
fn flatten(
    artifact: &ModuleArtifact,
    bound: &BoundDeclarations,
    options: &EmitOptions,
    metadata_only: bool,
) -> anyhow::Result<Flattened> {
    let mut names = NameTable::new();
    let mut symbols = vec![];
    let mut symbol_indices = HashMap::new();

    for (id, symbol) in bound.symbols() {
        if metadata_only {
            let local = matches!(symbol.origin, SymbolOrigin::Local { .. });
            let visible = symbol.visibility == Visibility::Public || options.include_private;
            if !local || !visible {
                continue;
            }
        }
        let (class, param_count) = match symbol.kind {
            SymbolKind::Const => (SymbolClass::Const, 0),
            SymbolKind::Function { param_count } => {
                (SymbolClass::Function, param_count as u16)
            }
        };
        symbol_indices.insert(id, symbols.len() as u32);
        symbols.push(SymbolEntry {
            name: names.intern(&symbol.name),
            namespace: names.intern(bound.namespace_name(symbol.namespace)),
            class,
            visibility: match symbol.visibility {
                Visibility::Public => SymbolVisibility::Public,
                Visibility::Private => SymbolVisibility::Private,
            },
            param_count,
        });
    }

    let mut methods = vec![];
    for method in artifact.methods() {
        let Some(&symbol) = symbol_indices.get(&method.symbol) else {
            // Metadata-only output dropped this method's symbol.
            continue;
        };
        methods.push(UnlinkedMethod {
            symbol,
            local_count: method.local_count,
            code: if metadata_only {
                vec![]
            } else {
                encode_method(method, &mut names, &symbol_indices)?
            },
        });
    }

    let resources = if metadata_only {
        vec![]
    } else {
        artifact
            .resources()
            .iter()
            .map(|resource| ResourceEntry {
                name: names.intern(&resource.name),
                data: resource.data.clone(),
            })
            .collect()
    };

    Ok(Flattened {
        names,
        symbols,
        methods,
        resources,
    })
}

fn encode_method(
    method: &CompiledMethod,
    names: &mut NameTable,
    symbol_indices: &HashMap<SymbolId, u32>,
) -> anyhow::Result<Vec<u8>> {
    let index_of = |id: &SymbolId| {
        symbol_indices
            .get(id)
            .copied()
            .context("method code references a symbol absent from the image")
    };

    let mut code = vec![];
    let mut serializer = Serializer::new(Cursor::new(&mut code));
    for op in &method.ops {
        match op {
            Op::PushInt(value) => {
                opcode::PUSH_INT.serialize(&mut serializer)?;
                value.serialize(&mut serializer)?;
            }
            Op::PushStr(value) => {
                opcode::PUSH_STR.serialize(&mut serializer)?;
                names.intern(value).serialize(&mut serializer)?;
            }
            Op::LoadLocal(slot) => {
                opcode::LOAD_LOCAL.serialize(&mut serializer)?;
                slot.serialize(&mut serializer)?;
            }
            Op::StoreLocal(slot) => {
                opcode::STORE_LOCAL.serialize(&mut serializer)?;
                slot.serialize(&mut serializer)?;
            }
            Op::LoadSymbol(id) => {
                opcode::LOAD_SYMBOL.serialize(&mut serializer)?;
                index_of(id)?.serialize(&mut serializer)?;
            }
            Op::Call { symbol, arg_count } => {
                opcode::CALL.serialize(&mut serializer)?;
                index_of(symbol)?.serialize(&mut serializer)?;
                arg_count.serialize(&mut serializer)?;
            }
            Op::Add => opcode::ADD.serialize(&mut serializer)?,
            Op::Subtract => opcode::SUBTRACT.serialize(&mut serializer)?,
            Op::Multiply => opcode::MULTIPLY.serialize(&mut serializer)?,
            Op::Divide => opcode::DIVIDE.serialize(&mut serializer)?,
            Op::Pop => opcode::POP.serialize(&mut serializer)?,
            Op::Return => opcode::RETURN.serialize(&mut serializer)?,
            Op::ReturnVoid => opcode::RETURN_VOID.serialize(&mut serializer)?,
            Op::CoveragePoint(point) => {
                opcode::COVERAGE_POINT.serialize(&mut serializer)?;
                point.serialize(&mut serializer)?;
            }
        }
    }
    Ok(code)
}

fn build_debug(methods: &[CompiledMethod], set: &SourceSet) -> DebugInfo {
    let mut files: Vec<String> = vec![];
    let mut file_indices: HashMap<SourceFileId, u32> = HashMap::new();
    let mut entries = vec![];
    for (index, method) in methods.iter().enumerate() {
        let file = *file_indices.entry(method.source_file).or_insert_with(|| {
            files.push(set.files().get(method.source_file).filename.clone());
            (files.len() - 1) as u32
        });
        entries.push(MethodDebug {
            method: index as u32,
            file,
            span_start: method.span.start as u32,
            span_end: method.span.end as u32,
        });
    }
    DebugInfo {
        files,
        methods: entries,
    }
}

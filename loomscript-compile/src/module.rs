//! The module-being-built and its construction state machine.

use std::collections::HashSet;
use std::fmt::Write as _;

use loomscript_foundation::errors::{Diagnostic, Label};
use thiserror::Error;
use tracing::info_span;
use uuid::Uuid;

use crate::{
    bind::{SymbolKind, SymbolOrigin},
    ir::CompiledMethod,
    options::{EmitOptions, OutputKind},
    sources::SourceSet,
};

/// Construction stages of a [`ModuleArtifact`]. Transitions are one-way:
/// `Open` → `Finalized` → `Serialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Accepting methods and resources.
    Open,
    /// Content is sealed; the module can be serialized.
    Finalized,
    /// Serialized at least once. Content stays sealed; further
    /// serializations are allowed, each one a full independent write.
    Serialized,
}

/// A pipeline stage was invoked without its precondition state.
///
/// These are bugs in the calling code, not problems in user source, and
/// the pipeline fails fast on them instead of producing partial output.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot add content to a module in the {0:?} stage")]
    NotOpen(Stage),
    #[error("module has already been finalized")]
    AlreadyFinalized,
    #[error("cannot serialize a module in the {0:?} stage; it must be finalized first")]
    NotFinalized(Stage),
    #[error("declaration binding reported errors and the error policy is fail-closed")]
    DeclarationErrors,
}

#[derive(Debug, Clone)]
pub struct EmbeddedResource {
    pub name: String,
    pub data: Vec<u8>,
}

/// The in-memory module representation under construction.
///
/// Exactly one compilation run owns an artifact; it is never shared. Method
/// compilation populates it while `Open`, [`ModuleArtifact::finalize`] seals
/// it, serialization reads it afterwards. Repeated measurement runs must
/// each build a fresh artifact from a fresh source set.
#[derive(Debug)]
pub struct ModuleArtifact {
    name: String,
    uuid: Uuid,
    stage: Stage,
    methods: Vec<CompiledMethod>,
    resources: Vec<EmbeddedResource>,
    docs: Option<String>,
    advisories: Vec<Diagnostic>,
    used_imports: HashSet<(usize, String)>,
}

impl ModuleArtifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            stage: Stage::Open,
            methods: vec![],
            resources: vec![],
            docs: None,
            advisories: vec![],
            used_imports: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable for the lifetime of the artifact, so repeated serializations
    /// of one finalized module are byte-identical.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn methods(&self) -> &[CompiledMethod] {
        &self.methods
    }

    pub fn resources(&self) -> &[EmbeddedResource] {
        &self.resources
    }

    pub fn docs(&self) -> Option<&str> {
        self.docs.as_deref()
    }

    /// Diagnostics appended by finalization steps.
    pub fn advisories(&self) -> &[Diagnostic] {
        &self.advisories
    }

    pub(crate) fn ensure_open(&self) -> Result<(), StateError> {
        match self.stage {
            Stage::Open => Ok(()),
            stage => Err(StateError::NotOpen(stage)),
        }
    }

    pub(crate) fn add_method(&mut self, method: CompiledMethod) -> Result<(), StateError> {
        self.ensure_open()?;
        self.methods.push(method);
        Ok(())
    }

    /// Records that a unit's import was actually needed by compiled code.
    pub(crate) fn note_import_use(&mut self, unit: usize, namespace: &str) -> Result<(), StateError> {
        self.ensure_open()?;
        self.used_imports.insert((unit, namespace.to_owned()));
        Ok(())
    }

    /// Adds all non-code content and seals the module, in a fixed order:
    /// resources, documentation, unused-import advisories, the entry-point
    /// check, then the transition to [`Stage::Finalized`].
    ///
    /// Each step may append advisory diagnostics; none reverts an earlier
    /// step. Finalizing twice is an error, not a no-op - sealing has
    /// observable effects and calling it again means the orchestration is
    /// confused about what stage it is in.
    pub fn finalize(
        &mut self,
        set: &SourceSet,
        options: &EmitOptions,
        resources: Vec<EmbeddedResource>,
    ) -> Result<&[Diagnostic], StateError> {
        let _span = info_span!("finalize_module").entered();

        match self.stage {
            Stage::Open => {}
            Stage::Finalized | Stage::Serialized => return Err(StateError::AlreadyFinalized),
        }
        let bound = set.bound_declarations();

        self.resources = resources;

        if options.generate_docs {
            self.docs = Some(render_docs(&self.name, bound));
        }

        for (unit_index, unit) in set.units().iter().enumerate() {
            for import in &unit.imports {
                if bound.namespace_id(&import.namespace).is_none() {
                    // Already reported as unresolved during binding.
                    continue;
                }
                if !self
                    .used_imports
                    .contains(&(unit_index, import.namespace.clone()))
                {
                    self.advisories.push(
                        Diagnostic::warning(
                            unit.source_file,
                            format!("import `{}` is never used", import.namespace),
                        )
                        .with_code("LS0008")
                        .with_label(Label::primary(import.span, "")),
                    );
                }
            }
        }

        if set.options().output_kind == OutputKind::Program {
            let has_main = bound.symbols().any(|(_, symbol)| {
                symbol.name == "main"
                    && matches!(symbol.kind, SymbolKind::Function { .. })
                    && matches!(symbol.origin, SymbolOrigin::Local { .. })
            });
            if !has_main {
                if let Some(unit) = set.units().first() {
                    self.advisories.push(
                        Diagnostic::error(
                            unit.source_file,
                            "a program module must declare a `main` function",
                        )
                        .with_code("LS0010"),
                    );
                }
            }
        }

        self.stage = Stage::Finalized;
        Ok(&self.advisories)
    }

    pub(crate) fn mark_serialized(&mut self) -> Result<(), StateError> {
        match self.stage {
            Stage::Finalized | Stage::Serialized => {
                self.stage = Stage::Serialized;
                Ok(())
            }
            Stage::Open => Err(StateError::NotFinalized(Stage::Open)),
        }
    }
}

/// Renders documentation text for every documented local symbol, in
/// registration order (which is unit order, so the output is stable.)
fn render_docs(module_name: &str, bound: &crate::bind::BoundDeclarations) -> String {
    let mut text = format!("# Module `{module_name}`\n");
    for (_, symbol) in bound.symbols() {
        if !matches!(symbol.origin, SymbolOrigin::Local { .. }) {
            continue;
        }
        let Some(doc) = &symbol.doc else { continue };
        let namespace = bound.namespace_name(symbol.namespace);
        _ = write!(text, "\n## `{namespace}.{}`\n\n{doc}\n", symbol.name);
    }
    text
}

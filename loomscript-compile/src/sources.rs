use std::sync::{Arc, OnceLock};

use loomscript_foundation::{errors::Diagnostic, source::SourceFileSet};

use crate::{
    bind::{self, BoundDeclarations, SymbolKind},
    options::CompileOptions,
    unit::SourceUnit,
};

/// A symbol another module exports, as recorded in its reference metadata.
#[derive(Debug, Clone)]
pub struct ExportedSymbol {
    pub namespace: String,
    pub name: String,
    pub kind: SymbolKind,
}

/// Metadata handle for an already-compiled module the compilation links
/// against.
#[derive(Debug, Clone)]
pub struct ExternalReference {
    pub module_name: String,
    pub exports: Vec<ExportedSymbol>,
}

/// The input to a compilation: parsed units, references, options.
///
/// A source set is immutable. The bound declaration state derived from it is
/// computed at most once and cached for the set's lifetime; the only way to
/// invalidate it is to construct a new set (see [`SourceSet::with_options`]).
/// Sets and their bound state are freely shareable across threads.
pub struct SourceSet {
    files: Arc<SourceFileSet>,
    units: Vec<SourceUnit>,
    references: Vec<ExternalReference>,
    options: CompileOptions,
    bound: OnceLock<Arc<BoundDeclarations>>,
}

impl SourceSet {
    pub fn new(
        files: Arc<SourceFileSet>,
        units: Vec<SourceUnit>,
        references: Vec<ExternalReference>,
        options: CompileOptions,
    ) -> Self {
        Self {
            files,
            units,
            references,
            options,
            bound: OnceLock::new(),
        }
    }

    pub fn files(&self) -> &SourceFileSet {
        &self.files
    }

    pub fn units(&self) -> &[SourceUnit] {
        &self.units
    }

    pub fn references(&self) -> &[ExternalReference] {
        &self.references
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Binds declarations across all units, memoized.
    ///
    /// The first call does the work; every later call returns the same
    /// state. Semantic problems found during binding are recorded in the
    /// returned state's diagnostics, never raised as errors.
    pub fn bound_declarations(&self) -> &Arc<BoundDeclarations> {
        self.bound.get_or_init(|| Arc::new(bind::bind(self)))
    }

    /// Declaration-level diagnostics, binding first if needed.
    pub fn declaration_diagnostics(&self) -> &[Diagnostic] {
        &self.bound_declarations().diagnostics
    }

    /// Builds a fresh set with different options and an empty bind cache.
    ///
    /// Cached binding depends on the options it was computed under, which is
    /// why options cannot be changed in place.
    pub fn with_options(&self, options: CompileOptions) -> SourceSet {
        SourceSet::new(
            Arc::clone(&self.files),
            self.units.clone(),
            self.references.clone(),
            options,
        )
    }
}

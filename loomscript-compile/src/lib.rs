//! The staged LoomScript compilation pipeline.
//!
//! A compilation starts from an immutable [`SourceSet`] of parsed units and
//! advances through phases, each of which may be invoked independently as
//! long as its prerequisite state exists:
//!
//! 1. declaration binding ([`SourceSet::bound_declarations`], memoized),
//! 2. diagnostics, plain or analyzer-augmented ([`analyze`]),
//! 3. method-body compilation ([`compile_methods`]),
//! 4. module finalization ([`ModuleArtifact::finalize`]),
//! 5. binary serialization ([`emit::serialize`]).
//!
//! Semantic problems in user source flow out of every phase as plain
//! diagnostic values. Calling a phase whose prerequisite state does not
//! exist is a [`StateError`] - a bug in the caller, reported immediately
//! and never silently swallowed.

pub mod analyze;
pub mod bind;
mod diagnostics;
pub mod emit;
pub mod ir;
pub mod lints;
pub mod methods;
pub mod module;
pub mod options;
pub mod sources;
pub mod unit;

pub use analyze::{analyze, AnalysisHandle, AnalysisOutcome, Analyzer, AnalyzerOptions, CancellationToken};
pub use bind::{BoundDeclarations, NamespaceId, Symbol, SymbolId, SymbolKind, SymbolOrigin};
pub use methods::{compile_methods, MethodCompilation};
pub use module::{EmbeddedResource, ModuleArtifact, Stage, StateError};
pub use options::*;
pub use sources::{ExportedSymbol, ExternalReference, SourceSet};

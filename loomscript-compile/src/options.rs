//! Configuration passed explicitly into every pipeline stage.
//!
//! There is deliberately no process-wide configuration: concurrent or
//! repeated pipeline runs must not be able to interfere with each other,
//! so options travel as plain immutable values.

/// Options fixed for the lifetime of a [`crate::SourceSet`].
///
/// Changing any of these requires building a new source set, because the
/// memoized bound state depends on them.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Fan work out across a thread pool where a stage supports it.
    pub concurrent: bool,
    pub output_kind: OutputKind,
    pub error_policy: ErrorPolicy,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            concurrent: true,
            output_kind: OutputKind::Library,
            error_policy: ErrorPolicy::FailClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Library,
    /// A runnable module; finalization checks that a `main` function exists.
    Program,
}

/// What to do about declaration errors when the caller asks for emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Method compilation refuses to run while declaration binding reports
    /// errors.
    FailClosed,
    /// Compile and emit whatever can be compiled; every diagnostic is still
    /// reported.
    EmitAnyway,
}

/// Options for method compilation and serialization.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Keep private symbols in metadata output.
    pub include_private: bool,
    pub debug_info: DebugInfoMode,
    /// Emit a declarations-only primary image with an empty code segment.
    pub metadata_only: bool,
    /// Overrides the module name recorded in the image summary.
    pub output_name: Option<String>,
    /// Insert coverage points at every statement.
    pub instrument_coverage: bool,
    pub generate_docs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugInfoMode {
    #[default]
    None,
    /// Debug section appended to the primary image.
    Embedded,
    /// Debug section written to its own stream.
    Separate,
}

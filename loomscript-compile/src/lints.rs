//! Stock analyzers shipped with the compiler.
//!
//! These are ordinary [`Analyzer`] implementations with no special access;
//! anything they do, an externally supplied analyzer can do too.

use loomscript_foundation::{
    errors::{Diagnostic, Label},
    span::Spanned,
};

use crate::{
    analyze::{Analyzer, AnalyzerOptions},
    bind::BoundDeclarations,
    unit::{Decl, SourceUnit},
};

/// Warns about declaration names that are not `lower_snake_case`.
///
/// Set `identifier-naming.allow-upper` to any value to silence it, e.g. for
/// code generated from sources with different conventions.
pub struct IdentifierNaming;

fn is_lower_snake_case(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl Analyzer for IdentifierNaming {
    fn name(&self) -> &str {
        "identifier-naming"
    }

    fn analyze_unit(
        &self,
        unit: &SourceUnit,
        _: &BoundDeclarations,
        options: &AnalyzerOptions,
    ) -> Vec<Diagnostic> {
        if options.get("identifier-naming.allow-upper").is_some() {
            return vec![];
        }
        let mut diagnostics = vec![];
        for decl in &unit.decls {
            if !is_lower_snake_case(decl.name()) {
                diagnostics.push(
                    Diagnostic::warning(
                        unit.source_file,
                        format!("`{}` should be named in lower_snake_case", decl.name()),
                    )
                    .with_code("LS1001")
                    .with_label(Label::primary(decl.span(), "")),
                );
            }
        }
        diagnostics
    }
}

/// Warns about functions whose body contains no statements at all.
pub struct EmptyFunction;

impl Analyzer for EmptyFunction {
    fn name(&self) -> &str {
        "empty-function"
    }

    fn analyze_unit(
        &self,
        unit: &SourceUnit,
        _: &BoundDeclarations,
        _: &AnalyzerOptions,
    ) -> Vec<Diagnostic> {
        unit.decls
            .iter()
            .filter_map(|decl| match decl {
                Decl::Function(function) if function.body.is_empty() => Some(
                    Diagnostic::warning(
                        unit.source_file,
                        format!("function `{}` has an empty body", function.name),
                    )
                    .with_code("LS1002")
                    .with_label(Label::primary(function.span, "")),
                ),
                _ => None,
            })
            .collect()
    }
}

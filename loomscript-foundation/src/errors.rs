mod sink;

use std::ops::Range;

pub use codespan_reporting::diagnostic::LabelStyle;
pub use codespan_reporting::diagnostic::Severity;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::ColorChoice;
use codespan_reporting::term::termcolor::StandardStream;
pub use sink::*;

use crate::source::SourceFileId;
use crate::source::SourceFileSet;
use crate::span::Span;

#[derive(Debug, Clone)]
pub struct Label {
    pub style: LabelStyle,
    pub span: Span,
    pub message: String,
    pub file: Option<SourceFileId>,
}

impl Label {
    pub fn new<O, M>(style: LabelStyle, span: Span, message: O) -> Self
    where
        O: Into<Option<M>>,
        M: Into<String>,
    {
        let message = message.into();
        let message = message.map(|x| x.into());
        Self {
            style,
            span,
            message: message.unwrap_or_default(),
            file: None,
        }
    }

    pub fn primary<O, M>(span: Span, message: O) -> Self
    where
        O: Into<Option<M>>,
        M: Into<String>,
    {
        Self::new(LabelStyle::Primary, span, message)
    }

    pub fn secondary<O, M>(span: Span, message: O) -> Self
    where
        O: Into<Option<M>>,
        M: Into<String>,
    {
        Self::new(LabelStyle::Secondary, span, message)
    }

    pub fn in_file(mut self, file: SourceFileId) -> Self {
        self.file = Some(file);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub source_file: SourceFileId,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, source_file: SourceFileId, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            message: message.into(),
            source_file,
            labels: vec![],
            notes: vec![],
        }
    }

    pub fn bug(file: SourceFileId, error: impl ToString) -> Self {
        Self::new(Severity::Bug, file, error.to_string())
    }

    pub fn error(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, file, message)
    }

    pub fn warning(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, file, message)
    }

    pub fn note(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, file, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// The span of the diagnostic's primary label, if it has one.
    pub fn primary_span(&self) -> Option<Span> {
        self.labels
            .iter()
            .find(|label| label.style == LabelStyle::Primary)
            .map(|label| label.span)
    }

    pub fn emit_to_stderr(
        self,
        files: &SourceFileSet,
    ) -> Result<(), codespan_reporting::files::Error> {
        term::emit(
            &mut StandardStream::stderr(ColorChoice::Auto),
            &term::Config::default(),
            files,
            &self.into(),
        )
    }
}

/// Orders diagnostics by source position (file, then primary span start.)
///
/// Work that completes on a thread pool arrives in whatever order the pool
/// finishes it; reports must not depend on that order.
pub fn sort_by_location(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by_key(|diagnostic| {
        (
            diagnostic.source_file,
            diagnostic.primary_span().map(|span| span.start).unwrap_or(0),
        )
    });
}

impl From<Diagnostic> for codespan_reporting::diagnostic::Diagnostic<SourceFileId> {
    fn from(diag: Diagnostic) -> Self {
        Self {
            severity: diag.severity,
            code: diag.code,
            message: diag.message,
            labels: diag
                .labels
                .into_iter()
                .map(|label| codespan_reporting::diagnostic::Label {
                    style: label.style,
                    file_id: label.file.unwrap_or(diag.source_file),
                    range: Range::from(label.span),
                    message: label.message,
                })
                .collect(),
            notes: diag.notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{sort_by_location, Diagnostic, Label};
    use crate::source::{SourceFile, SourceFileSet};
    use crate::span::Span;

    #[test]
    fn sorting_is_by_file_then_span() {
        let mut set = SourceFileSet::new();
        let a = set.add(SourceFile::new("A.loom".into(), "aaaa".into()));
        let b = set.add(SourceFile::new("B.loom".into(), "bbbb".into()));

        let mut diagnostics = vec![
            Diagnostic::error(b, "late file")
                .with_label(Label::primary::<_, &str>(Span::from(0..1), None)),
            Diagnostic::error(a, "late span")
                .with_label(Label::primary::<_, &str>(Span::from(2..3), None)),
            Diagnostic::error(a, "early span")
                .with_label(Label::primary::<_, &str>(Span::from(0..1), None)),
        ];
        sort_by_location(&mut diagnostics);
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["early span", "late span", "late file"]);
    }
}

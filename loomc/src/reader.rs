//! Reads `.loom` unit files into the trees the pipeline consumes.
//!
//! The format is line-oriented on purpose: one declaration header or one
//! statement per line, function bodies closed by `end`. Reader problems are
//! reported as ordinary diagnostics against the offending line, and reading
//! continues, so a single malformed line does not hide the rest of a file.

use loomscript_compile::unit::{
    ConstDecl, Decl, Expr, FunctionDecl, Import, Literal, Param, SourceUnit, Stmt, Visibility,
};
use loomscript_foundation::{
    errors::{Diagnostic, DiagnosticSink, Label},
    source::SourceFileId,
    span::Span,
};

/// Reads one source file into a unit.
///
/// Returns `None` when the file lacks the leading `namespace` declaration;
/// anything less fatal is reported and skipped.
pub fn read_unit(
    file: SourceFileId,
    source: &str,
    diagnostics: &mut dyn DiagnosticSink,
) -> Option<SourceUnit> {
    let mut reader = Reader {
        file,
        diagnostics,
        unit: None,
        doc: None,
        current_function: None,
    };
    let mut offset = 0;
    for raw_line in source.split_inclusive('\n') {
        let line = raw_line.trim_end_matches(['\n', '\r']);
        reader.line(line, offset);
        offset += raw_line.len();
    }
    reader.finish(offset)
}

struct Reader<'a> {
    file: SourceFileId,
    diagnostics: &'a mut dyn DiagnosticSink,
    unit: Option<SourceUnit>,
    /// Doc comment lines gathered for the next declaration.
    doc: Option<String>,
    current_function: Option<FunctionDecl>,
}

impl<'a> Reader<'a> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.emit(
            Diagnostic::error(self.file, message)
                .with_code("LS0100")
                .with_label(Label::primary(span, "")),
        );
    }

    fn line(&mut self, line: &str, offset: usize) {
        let mut cursor = Cursor::new(line, offset);
        cursor.skip_whitespace();
        if cursor.at_end() {
            return;
        }
        if let Some(doc_text) = cursor.strip_prefix("##") {
            let doc = self.doc.get_or_insert_with(String::new);
            if !doc.is_empty() {
                doc.push('\n');
            }
            doc.push_str(doc_text.trim());
            return;
        }
        if cursor.peek() == Some('#') {
            return;
        }

        if self.current_function.is_some() {
            self.body_line(cursor);
        } else {
            self.header_line(cursor);
        }
    }

    fn header_line(&mut self, mut cursor: Cursor<'_>) {
        let Some((word, word_span)) = cursor.word() else {
            self.error(cursor.here(), "expected a declaration");
            return;
        };

        if self.unit.is_none() {
            if word != "namespace" {
                self.error(word_span, "the unit must start with `namespace <name>`");
                return;
            }
            let Some((name, name_span)) = cursor.word() else {
                self.error(cursor.here(), "expected a namespace name");
                return;
            };
            self.unit = Some(SourceUnit {
                source_file: self.file,
                namespace: name.to_owned(),
                namespace_span: name_span,
                imports: vec![],
                decls: vec![],
            });
            return;
        }

        let (visibility, word, word_span) = if word == "pub" {
            match cursor.word() {
                Some((next, next_span)) => (Visibility::Public, next, next_span),
                None => {
                    self.error(cursor.here(), "expected a declaration after `pub`");
                    return;
                }
            }
        } else {
            (Visibility::Private, word, word_span)
        };

        match word {
            "namespace" => self.error(word_span, "a unit declares its namespace only once"),
            "import" => {
                if visibility == Visibility::Public {
                    self.error(word_span, "imports cannot be `pub`");
                    return;
                }
                let Some((name, name_span)) = cursor.word() else {
                    self.error(cursor.here(), "expected a namespace name to import");
                    return;
                };
                self.unit
                    .as_mut()
                    .expect("checked above")
                    .imports
                    .push(Import {
                        namespace: name.to_owned(),
                        span: name_span,
                    });
            }
            "const" => self.const_decl(cursor, visibility),
            "fn" => self.function_header(cursor, visibility),
            "end" => self.error(word_span, "`end` without a matching `fn`"),
            _ => self.error(word_span, format!("unknown declaration `{word}`")),
        }
    }

    fn const_decl(&mut self, mut cursor: Cursor<'_>, visibility: Visibility) {
        let Some((name, name_span)) = cursor.word() else {
            self.error(cursor.here(), "expected a constant name");
            return;
        };
        cursor.skip_whitespace();
        if !cursor.eat('=') {
            self.error(cursor.here(), "expected `=` after the constant name");
            return;
        }
        cursor.skip_whitespace();
        let (rest, rest_span) = cursor.rest();
        let value = if let Some(quoted) = rest.strip_prefix('"') {
            match quoted.strip_suffix('"') {
                Some(text) if rest.len() >= 2 => Literal::Str(text.to_owned()),
                _ => {
                    self.error(rest_span, "unterminated string literal");
                    return;
                }
            }
        } else {
            match rest.parse::<i64>() {
                Ok(value) => Literal::Int(value),
                Err(_) => {
                    self.error(
                        rest_span,
                        "a constant's value must be an integer or a string literal",
                    );
                    return;
                }
            }
        };
        let doc = self.doc.take();
        self.unit
            .as_mut()
            .expect("checked above")
            .decls
            .push(Decl::Const(ConstDecl {
                name: name.to_owned(),
                span: name_span,
                visibility,
                doc,
                value,
            }));
    }

    fn function_header(&mut self, mut cursor: Cursor<'_>, visibility: Visibility) {
        let Some((name, name_span)) = cursor.word() else {
            self.error(cursor.here(), "expected a function name");
            return;
        };
        if !cursor.eat('(') {
            self.error(cursor.here(), "expected `(` after the function name");
            return;
        }
        let mut params = vec![];
        loop {
            cursor.skip_whitespace();
            if cursor.eat(')') {
                break;
            }
            let Some((param, param_span)) = cursor.word() else {
                self.error(cursor.here(), "expected a parameter name or `)`");
                return;
            };
            params.push(Param {
                name: param.to_owned(),
                span: param_span,
            });
            cursor.skip_whitespace();
            if !cursor.eat(',') && cursor.peek() != Some(')') {
                self.error(cursor.here(), "expected `,` or `)` in the parameter list");
                return;
            }
        }
        self.current_function = Some(FunctionDecl {
            name: name.to_owned(),
            span: name_span,
            visibility,
            doc: self.doc.take(),
            params,
            body: vec![],
        });
    }

    fn body_line(&mut self, mut cursor: Cursor<'_>) {
        let checkpoint = cursor.clone();
        let word = cursor.word();
        match word {
            Some(("end", _)) => {
                let function = self
                    .current_function
                    .take()
                    .expect("body_line requires a current function");
                self.unit
                    .as_mut()
                    .expect("a function implies a unit")
                    .decls
                    .push(Decl::Function(function));
            }
            Some(("let", _)) => {
                let Some((name, name_span)) = cursor.word() else {
                    self.error(cursor.here(), "expected a binding name after `let`");
                    return;
                };
                cursor.skip_whitespace();
                if !cursor.eat('=') {
                    self.error(cursor.here(), "expected `=` after the binding name");
                    return;
                }
                if let Some(value) = self.parse_expr(cursor) {
                    self.push_stmt(Stmt::Let {
                        name: name.to_owned(),
                        name_span,
                        value,
                    });
                }
            }
            Some(("return", return_span)) => {
                cursor.skip_whitespace();
                if cursor.at_end() {
                    self.push_stmt(Stmt::Return {
                        span: return_span,
                        value: None,
                    });
                } else if let Some(value) = self.parse_expr(cursor) {
                    self.push_stmt(Stmt::Return {
                        span: return_span,
                        value: Some(value),
                    });
                }
            }
            _ => {
                if let Some(expr) = self.parse_expr(checkpoint) {
                    self.push_stmt(Stmt::Expr(expr));
                }
            }
        }
    }

    fn push_stmt(&mut self, stmt: Stmt) {
        self.current_function
            .as_mut()
            .expect("statements only appear inside a function")
            .body
            .push(stmt);
    }

    fn parse_expr(&mut self, mut cursor: Cursor<'_>) -> Option<Expr> {
        let (text, span) = cursor.rest();
        match expr::parse(text, span.start, self.file) {
            Ok(expr) => Some(expr),
            Err(diagnostic) => {
                self.diagnostics.emit(diagnostic);
                None
            }
        }
    }

    fn finish(mut self, end_offset: usize) -> Option<SourceUnit> {
        if let Some(function) = self.current_function.take() {
            self.error(
                function.span,
                format!("function `{}` is missing its `end`", function.name),
            );
        }
        if self.unit.is_none() {
            self.error(
                Span {
                    start: end_offset,
                    end: end_offset,
                },
                "the unit never declared a namespace",
            );
        }
        self.unit
    }
}

/// A cursor over a single line, tracking absolute byte offsets.
#[derive(Clone)]
struct Cursor<'a> {
    line: &'a str,
    base: usize,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str, base: usize) -> Self {
        Self {
            line,
            base,
            position: 0,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.line[self.position..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.remaining().trim_start();
        self.position = self.line.len() - trimmed.len();
    }

    fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.remaining().is_empty()
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.position += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn strip_prefix(&mut self, prefix: &str) -> Option<&'a str> {
        self.remaining().strip_prefix(prefix)
    }

    /// Consumes an identifier-shaped word.
    fn word(&mut self) -> Option<(&'a str, Span)> {
        self.skip_whitespace();
        let rest = self.remaining();
        let len = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        let start = self.base + self.position;
        self.position += len;
        Some((
            &rest[..len],
            Span {
                start,
                end: start + len,
            },
        ))
    }

    /// Everything left on the line.
    fn rest(&mut self) -> (&'a str, Span) {
        self.skip_whitespace();
        let start = self.base + self.position;
        let rest = self.remaining();
        (
            rest,
            Span {
                start,
                end: start + rest.len(),
            },
        )
    }

    /// An empty span at the current position, for diagnostics.
    fn here(&mut self) -> Span {
        self.skip_whitespace();
        let at = self.base + self.position;
        Span { start: at, end: at }
    }
}

mod expr {
    //! A tiny recursive-descent expression parser:
    //! `expr := term (('+'|'-') term)*`, `term := factor (('*'|'/') factor)*`,
    //! `factor := INT | STRING | IDENT | IDENT '(' expr, ... ')' | '(' expr ')'`.

    use loomscript_compile::unit::{BinaryOp, Expr, Literal};
    use loomscript_foundation::{
        errors::{Diagnostic, Label},
        source::SourceFileId,
        span::{Span, Spanned},
    };

    pub fn parse(text: &str, base: usize, file: SourceFileId) -> Result<Expr, Diagnostic> {
        let tokens = lex(text, base, file)?;
        let mut parser = Parser {
            tokens,
            position: 0,
            file,
            end: Span {
                start: base + text.len(),
                end: base + text.len(),
            },
        };
        let expr = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(Diagnostic::error(file, "unexpected trailing input")
                .with_code("LS0101")
                .with_label(Label::primary(token.span, "")));
        }
        Ok(expr)
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TokenKind {
        Int(i64),
        Str(String),
        Ident(String),
        Plus,
        Minus,
        Star,
        Slash,
        LeftParen,
        RightParen,
        Comma,
    }

    #[derive(Debug, Clone)]
    struct Token {
        kind: TokenKind,
        span: Span,
    }

    fn lex(text: &str, base: usize, file: SourceFileId) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = vec![];
        let mut chars = text.char_indices().peekable();
        while let Some(&(at, c)) = chars.peek() {
            let start = base + at;
            let single = |kind| Token {
                kind,
                span: Span {
                    start,
                    end: start + 1,
                },
            };
            match c {
                c if c.is_whitespace() => {
                    chars.next();
                }
                '+' => {
                    tokens.push(single(TokenKind::Plus));
                    chars.next();
                }
                '-' => {
                    tokens.push(single(TokenKind::Minus));
                    chars.next();
                }
                '*' => {
                    tokens.push(single(TokenKind::Star));
                    chars.next();
                }
                '/' => {
                    tokens.push(single(TokenKind::Slash));
                    chars.next();
                }
                '(' => {
                    tokens.push(single(TokenKind::LeftParen));
                    chars.next();
                }
                ')' => {
                    tokens.push(single(TokenKind::RightParen));
                    chars.next();
                }
                ',' => {
                    tokens.push(single(TokenKind::Comma));
                    chars.next();
                }
                '"' => {
                    chars.next();
                    let content_start = at + 1;
                    let mut content_end = None;
                    for (index, c) in chars.by_ref() {
                        if c == '"' {
                            content_end = Some(index);
                            break;
                        }
                    }
                    let Some(content_end) = content_end else {
                        return Err(Diagnostic::error(file, "unterminated string literal")
                            .with_code("LS0101")
                            .with_label(Label::primary(
                                Span {
                                    start,
                                    end: base + text.len(),
                                },
                                "",
                            )));
                    };
                    tokens.push(Token {
                        kind: TokenKind::Str(text[content_start..content_end].to_owned()),
                        span: Span {
                            start,
                            end: base + content_end + 1,
                        },
                    });
                }
                c if c.is_ascii_digit() => {
                    let mut end = at;
                    while let Some(&(index, c)) = chars.peek() {
                        if c.is_ascii_digit() {
                            end = index;
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let span = Span {
                        start,
                        end: base + end + 1,
                    };
                    let value = text[at..=end].parse::<i64>().map_err(|_| {
                        Diagnostic::error(file, "integer literal is out of range")
                            .with_code("LS0101")
                            .with_label(Label::primary(span, ""))
                    })?;
                    tokens.push(Token {
                        kind: TokenKind::Int(value),
                        span,
                    });
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut end = at;
                    while let Some(&(index, c)) = chars.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            end = index;
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    tokens.push(Token {
                        kind: TokenKind::Ident(text[at..=end].to_owned()),
                        span: Span {
                            start,
                            end: base + end + 1,
                        },
                    });
                }
                c => {
                    return Err(Diagnostic::error(
                        file,
                        format!("unexpected character `{c}`"),
                    )
                    .with_code("LS0101")
                    .with_label(Label::primary(
                        Span {
                            start,
                            end: start + c.len_utf8(),
                        },
                        "",
                    )));
                }
            }
        }
        Ok(tokens)
    }

    struct Parser {
        tokens: Vec<Token>,
        position: usize,
        file: SourceFileId,
        end: Span,
    }

    impl Parser {
        fn peek(&self) -> Option<&Token> {
            self.tokens.get(self.position)
        }

        fn next(&mut self) -> Option<Token> {
            let token = self.tokens.get(self.position).cloned();
            self.position += token.is_some() as usize;
            token
        }

        fn expr(&mut self) -> Result<Expr, Diagnostic> {
            let mut lhs = self.term()?;
            while let Some(token) = self.peek() {
                let op = match token.kind {
                    TokenKind::Plus => BinaryOp::Add,
                    TokenKind::Minus => BinaryOp::Subtract,
                    _ => break,
                };
                self.next();
                let rhs = self.term()?;
                let span = lhs.span().join(&rhs.span());
                lhs = Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    span,
                };
            }
            Ok(lhs)
        }

        fn term(&mut self) -> Result<Expr, Diagnostic> {
            let mut lhs = self.factor()?;
            while let Some(token) = self.peek() {
                let op = match token.kind {
                    TokenKind::Star => BinaryOp::Multiply,
                    TokenKind::Slash => BinaryOp::Divide,
                    _ => break,
                };
                self.next();
                let rhs = self.factor()?;
                let span = lhs.span().join(&rhs.span());
                lhs = Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    span,
                };
            }
            Ok(lhs)
        }

        fn factor(&mut self) -> Result<Expr, Diagnostic> {
            let Some(token) = self.next() else {
                return Err(Diagnostic::error(self.file, "expected an expression")
                    .with_code("LS0101")
                    .with_label(Label::primary(self.end, "")));
            };
            match token.kind {
                TokenKind::Int(value) => Ok(Expr::Literal {
                    literal: Literal::Int(value),
                    span: token.span,
                }),
                TokenKind::Str(value) => Ok(Expr::Literal {
                    literal: Literal::Str(value),
                    span: token.span,
                }),
                TokenKind::Ident(name) => {
                    if matches!(self.peek(), Some(t) if t.kind == TokenKind::LeftParen) {
                        self.next();
                        let mut args = vec![];
                        if !matches!(self.peek(), Some(t) if t.kind == TokenKind::RightParen) {
                            loop {
                                args.push(self.expr()?);
                                match self.next().map(|t| t.kind) {
                                    Some(TokenKind::Comma) => continue,
                                    Some(TokenKind::RightParen) => break,
                                    _ => {
                                        return Err(Diagnostic::error(
                                            self.file,
                                            "expected `,` or `)` in the argument list",
                                        )
                                        .with_code("LS0101")
                                        .with_label(Label::primary(self.end, "")));
                                    }
                                }
                            }
                        } else {
                            self.next();
                        }
                        let close = self
                            .tokens
                            .get(self.position.saturating_sub(1))
                            .map(|t| t.span)
                            .unwrap_or(token.span);
                        Ok(Expr::Call {
                            callee: name,
                            callee_span: token.span,
                            args,
                            span: token.span.join(&close),
                        })
                    } else {
                        Ok(Expr::Name {
                            name,
                            span: token.span,
                        })
                    }
                }
                TokenKind::LeftParen => {
                    let inner = self.expr()?;
                    match self.next().map(|t| t.kind) {
                        Some(TokenKind::RightParen) => Ok(inner),
                        _ => Err(Diagnostic::error(self.file, "expected `)`")
                            .with_code("LS0101")
                            .with_label(Label::primary(self.end, ""))),
                    }
                }
                _ => Err(Diagnostic::error(self.file, "expected an expression")
                    .with_code("LS0101")
                    .with_label(Label::primary(token.span, ""))),
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use loomscript_compile::unit::{Decl, Expr, Literal, Stmt, Visibility};
    use loomscript_foundation::source::{SourceFile, SourceFileSet};

    use super::read_unit;

    fn read(source: &str) -> (Option<loomscript_compile::unit::SourceUnit>, Vec<loomscript_foundation::errors::Diagnostic>) {
        let mut files = SourceFileSet::new();
        let file = files.add(SourceFile::new("Test.loom".into(), source.into()));
        let mut diagnostics = vec![];
        let unit = read_unit(file, source, &mut diagnostics);
        (unit, diagnostics)
    }

    #[test]
    fn a_complete_unit_reads_cleanly() {
        let (unit, diagnostics) = read(indoc! {r#"
            namespace geometry
            import util

            ## Twice the input.
            pub fn double(x)
              let two = 2
              return x * two
            end

            pub const scale = 3
            const greeting = "hello"
        "#});
        assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");
        let unit = unit.unwrap();
        assert_eq!(unit.namespace, "geometry");
        assert_eq!(unit.imports.len(), 1);
        assert_eq!(unit.decls.len(), 3);

        let Decl::Function(double) = &unit.decls[0] else {
            panic!("expected a function first");
        };
        assert_eq!(double.name, "double");
        assert_eq!(double.visibility, Visibility::Public);
        assert_eq!(double.doc.as_deref(), Some("Twice the input."));
        assert_eq!(double.params.len(), 1);
        assert_eq!(double.body.len(), 2);
        assert!(matches!(&double.body[0], Stmt::Let { name, .. } if name == "two"));

        let Decl::Const(greeting) = &unit.decls[2] else {
            panic!("expected a const last");
        };
        assert_eq!(greeting.visibility, Visibility::Private);
        assert_eq!(greeting.value, Literal::Str("hello".into()));
    }

    #[test]
    fn expressions_nest_with_precedence() {
        let (unit, diagnostics) = read(indoc! {"
            namespace math
            fn mix(a, b)
              return a + b * offset(2, a)
            end
        "});
        assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");
        let unit = unit.unwrap();
        let Decl::Function(mix) = &unit.decls[0] else {
            panic!("expected a function");
        };
        let Stmt::Return {
            value: Some(Expr::Binary { op, rhs, .. }),
            ..
        } = &mix.body[0]
        else {
            panic!("expected `return <binary>`");
        };
        assert_eq!(*op, loomscript_compile::unit::BinaryOp::Add);
        assert!(
            matches!(&**rhs, Expr::Binary { rhs: inner, .. }
                if matches!(&**inner, Expr::Call { callee, args, .. } if callee == "offset" && args.len() == 2)),
            "multiplication binds tighter and its rhs is the call"
        );
    }

    #[test]
    fn problems_are_reported_per_line_and_reading_continues() {
        let (unit, diagnostics) = read(indoc! {"
            namespace partial
            const broken =
            fn fine()
              return 1
            end
        "});
        let unit = unit.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code.as_deref(), Some("LS0100"));
        // The function after the broken line still made it in.
        assert_eq!(unit.decls.len(), 1);
        assert!(matches!(&unit.decls[0], Decl::Function(f) if f.name == "fine"));
    }

    #[test]
    fn a_missing_namespace_is_fatal_for_the_unit() {
        let (unit, diagnostics) = read("const orphan = 1\n");
        assert!(unit.is_none());
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn an_unclosed_function_is_reported() {
        let (unit, diagnostics) = read(indoc! {"
            namespace broken
            fn dangling()
              return 1
        "});
        assert!(unit.is_some());
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("missing its `end`"));
    }
}

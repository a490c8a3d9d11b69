//! The parsed form of a source unit.
//!
//! Producing these trees is the front end's job; the pipeline only consumes
//! them. One [`SourceUnit`] corresponds to one parsed file.

use loomscript_foundation::{
    source::SourceFileId,
    span::{Span, Spanned},
};

#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub source_file: SourceFileId,
    pub namespace: String,
    pub namespace_span: Span,
    pub imports: Vec<Import>,
    pub decls: Vec<Decl>,
}

/// Brings another namespace's `pub` symbols into scope within one unit.
#[derive(Debug, Clone)]
pub struct Import {
    pub namespace: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Const(ConstDecl),
    Function(FunctionDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Const(decl) => &decl.name,
            Decl::Function(decl) => &decl.name,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self {
            Decl::Const(decl) => decl.visibility,
            Decl::Function(decl) => decl.visibility,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            Decl::Const(decl) => decl.doc.as_deref(),
            Decl::Function(decl) => decl.doc.as_deref(),
        }
    }
}

impl Spanned for Decl {
    fn span(&self) -> Span {
        match self {
            Decl::Const(decl) => decl.span,
            Decl::Function(decl) => decl.span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: String,
    pub span: Span,
    pub visibility: Visibility,
    pub doc: Option<String>,
    pub value: Literal,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub span: Span,
    pub visibility: Visibility,
    pub doc: Option<String>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        name: String,
        name_span: Span,
        value: Expr,
    },
    Expr(Expr),
    Return {
        span: Span,
        value: Option<Expr>,
    },
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        match self {
            Stmt::Let { name_span, value, .. } => name_span.join(&value.span()),
            Stmt::Expr(expr) => expr.span(),
            Stmt::Return { span, value } => match value {
                Some(expr) => span.join(&expr.span()),
                None => *span,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        literal: Literal,
        span: Span,
    },
    Name {
        name: String,
        span: Span,
    },
    Call {
        callee: String,
        callee_span: Span,
        args: Vec<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Name { span, .. }
            | Expr::Call { span, .. }
            | Expr::Binary { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

//! The stack bytecode method bodies are lowered into.

use loomscript_foundation::{source::SourceFileId, span::Span};

use crate::bind::SymbolId;

/// One instruction. Operands reference locals by slot and symbols by id;
/// the serializer maps both onto image table indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    PushInt(i64),
    PushStr(String),
    LoadLocal(u16),
    StoreLocal(u16),
    /// Pushes the value of a `const` symbol (or a function reference.)
    LoadSymbol(SymbolId),
    Call { symbol: SymbolId, arg_count: u8 },
    Add,
    Subtract,
    Multiply,
    Divide,
    /// Discards the result of an expression statement.
    Pop,
    /// Returns the value on top of the stack.
    Return,
    ReturnVoid,
    /// Coverage instrumentation marker; present only when requested.
    CoveragePoint(u32),
}

/// A fully lowered method body, ready for serialization.
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    pub symbol: SymbolId,
    pub source_file: SourceFileId,
    pub span: Span,
    /// Parameters first, then `let` bindings, in declaration order.
    pub local_count: u16,
    pub ops: Vec<Op>,
}

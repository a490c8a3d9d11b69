//! Method-body compilation: lowering every function body in a bound source
//! set into stack bytecode.

use loomscript_foundation::errors::{sort_by_location, Diagnostic, Label, Severity};
use rayon::prelude::*;
use tracing::info_span;

use crate::{
    bind::{BoundDeclarations, SymbolId, SymbolKind, SymbolOrigin},
    diagnostics::notes,
    ir::{CompiledMethod, Op},
    module::ModuleArtifact,
    options::{EmitOptions, ErrorPolicy},
    sources::SourceSet,
    unit::{BinaryOp, Expr, FunctionDecl, Literal, SourceUnit, Stmt, Visibility},
    StateError,
};

/// What method compilation produced, besides the bodies themselves.
#[derive(Debug)]
pub struct MethodCompilation {
    /// False when any body failed to compile. The failing bodies are absent
    /// from the artifact; everything else is present.
    pub success: bool,
    /// Every problem found in every body, ordered by source location.
    pub diagnostics: Vec<Diagnostic>,
}

/// Compiles all method bodies into `artifact`.
///
/// Bodies are lowered in isolation from each other, in parallel when the
/// set's concurrency option is on. The pass is exhaustive: a failing body
/// records its diagnostics and is skipped, and every sibling is still
/// compiled, so one run reports every method error at once.
pub fn compile_methods(
    set: &SourceSet,
    options: &EmitOptions,
    artifact: &mut ModuleArtifact,
) -> Result<MethodCompilation, StateError> {
    let _span = info_span!("compile_methods").entered();

    artifact.ensure_open()?;
    let bound = set.bound_declarations();
    if set.options().error_policy == ErrorPolicy::FailClosed && bound.has_errors() {
        return Err(StateError::DeclarationErrors);
    }

    let jobs: Vec<(usize, &SourceUnit, &FunctionDecl)> = set
        .units()
        .iter()
        .enumerate()
        .flat_map(|(unit_index, unit)| {
            unit.decls.iter().filter_map(move |decl| match decl {
                crate::unit::Decl::Function(function) => Some((unit_index, unit, function)),
                crate::unit::Decl::Const(_) => None,
            })
        })
        .collect();

    let lowered: Vec<LoweredMethod> = if set.options().concurrent {
        jobs.par_iter()
            .map(|&(unit_index, unit, function)| {
                lower_method(bound, options, unit_index, unit, function)
            })
            .collect()
    } else {
        jobs.iter()
            .map(|&(unit_index, unit, function)| {
                lower_method(bound, options, unit_index, unit, function)
            })
            .collect()
    };

    let mut diagnostics = vec![];
    for result in lowered {
        diagnostics.extend(result.diagnostics);
        for namespace in result.used_imports {
            artifact.note_import_use(result.unit, &namespace)?;
        }
        if let Some(method) = result.method {
            artifact.add_method(method)?;
        }
    }

    let success = !diagnostics
        .iter()
        .any(|diagnostic| diagnostic.severity >= Severity::Error);
    sort_by_location(&mut diagnostics);
    Ok(MethodCompilation {
        success,
        diagnostics,
    })
}

struct LoweredMethod {
    unit: usize,
    method: Option<CompiledMethod>,
    diagnostics: Vec<Diagnostic>,
    used_imports: Vec<String>,
}

fn lower_method(
    bound: &BoundDeclarations,
    options: &EmitOptions,
    unit_index: usize,
    unit: &SourceUnit,
    function: &FunctionDecl,
) -> LoweredMethod {
    // A body whose declaration lost a redeclaration conflict has no symbol
    // of its own to attach to; binding has already reported it.
    let namespace = bound.unit_namespace(unit_index);
    let own_symbol = bound.lookup(namespace, &function.name).filter(|&id| {
        matches!(
            bound.symbol(id).origin,
            SymbolOrigin::Local { unit, span, .. } if unit == unit_index && span == function.span
        )
    });
    let Some(own_symbol) = own_symbol else {
        return LoweredMethod {
            unit: unit_index,
            method: None,
            diagnostics: vec![],
            used_imports: vec![],
        };
    };

    let mut lowerer = Lowerer {
        bound,
        unit_index,
        unit,
        locals: function.params.iter().map(|param| param.name.clone()).collect(),
        ops: vec![],
        diagnostics: vec![],
        used_imports: vec![],
        coverage: options.instrument_coverage.then_some(0),
        had_error: false,
    };
    for stmt in &function.body {
        lowerer.lower_stmt(stmt);
    }
    if !matches!(lowerer.ops.last(), Some(Op::Return | Op::ReturnVoid)) {
        lowerer.ops.push(Op::ReturnVoid);
    }

    LoweredMethod {
        unit: unit_index,
        method: (!lowerer.had_error).then(|| CompiledMethod {
            symbol: own_symbol,
            source_file: unit.source_file,
            span: function.span,
            local_count: lowerer.locals.len() as u16,
            ops: lowerer.ops,
        }),
        diagnostics: lowerer.diagnostics,
        used_imports: lowerer.used_imports,
    }
}

struct Lowerer<'a> {
    bound: &'a BoundDeclarations,
    unit_index: usize,
    unit: &'a SourceUnit,
    locals: Vec<String>,
    ops: Vec<Op>,
    diagnostics: Vec<Diagnostic>,
    used_imports: Vec<String>,
    /// Next coverage point id, when instrumentation is on.
    coverage: Option<u32>,
    had_error: bool,
}

enum Lookup {
    Found(SymbolId),
    FoundPrivate,
    NotFound,
}

impl<'a> Lowerer<'a> {
    fn error(&mut self, diagnostic: Diagnostic) {
        self.had_error = true;
        self.diagnostics.push(diagnostic);
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        if let Some(point) = self.coverage.as_mut() {
            let id = *point;
            *point += 1;
            self.ops.push(Op::CoveragePoint(id));
        }
        match stmt {
            Stmt::Let {
                name,
                name_span,
                value,
            } => {
                self.lower_expr(value);
                if self.locals.iter().any(|local| local == name) {
                    self.error(
                        Diagnostic::error(
                            self.unit.source_file,
                            format!("`{name}` is already bound in this function"),
                        )
                        .with_code("LS0006")
                        .with_label(Label::primary(*name_span, "rebound here")),
                    );
                } else {
                    self.locals.push(name.clone());
                    self.ops.push(Op::StoreLocal((self.locals.len() - 1) as u16));
                }
            }
            Stmt::Expr(expr) => {
                self.lower_expr(expr);
                self.ops.push(Op::Pop);
            }
            Stmt::Return { value, .. } => match value {
                Some(expr) => {
                    self.lower_expr(expr);
                    self.ops.push(Op::Return);
                }
                None => self.ops.push(Op::ReturnVoid),
            },
        }
    }

    fn lower_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal { literal, .. } => match literal {
                Literal::Int(value) => self.ops.push(Op::PushInt(*value)),
                Literal::Str(value) => self.ops.push(Op::PushStr(value.clone())),
            },
            Expr::Name { name, span } => {
                if let Some(slot) = self.locals.iter().position(|local| local == name) {
                    self.ops.push(Op::LoadLocal(slot as u16));
                    return;
                }
                match self.lookup_symbol(name) {
                    Lookup::Found(id) => self.ops.push(Op::LoadSymbol(id)),
                    found => {
                        let mut diagnostic = Diagnostic::error(
                            self.unit.source_file,
                            format!("undeclared identifier `{name}`"),
                        )
                        .with_code("LS0003")
                        .with_label(Label::primary(*span, ""));
                        if matches!(found, Lookup::FoundPrivate) {
                            diagnostic = diagnostic.with_note(notes::PRIVATE_SYMBOLS);
                        }
                        self.error(diagnostic);
                    }
                }
            }
            Expr::Call {
                callee,
                callee_span,
                args,
                span,
            } => {
                for arg in args {
                    self.lower_expr(arg);
                }
                let arg_count = match u8::try_from(args.len()) {
                    Ok(count) => count,
                    Err(_) => {
                        self.error(
                            Diagnostic::error(
                                self.unit.source_file,
                                "a call cannot pass more than 255 arguments",
                            )
                            .with_code("LS0005")
                            .with_label(Label::primary(*span, "")),
                        );
                        return;
                    }
                };
                match self.lookup_symbol(callee) {
                    Lookup::Found(id) => match self.bound.symbol(id).kind {
                        SymbolKind::Function { param_count } => {
                            if param_count != args.len() {
                                self.error(
                                    Diagnostic::error(
                                        self.unit.source_file,
                                        format!(
                                            "this call passes {} arguments, but `{callee}` takes {param_count}",
                                            args.len()
                                        ),
                                    )
                                    .with_code("LS0005")
                                    .with_label(Label::primary(*span, "")),
                                );
                            } else {
                                self.ops.push(Op::Call {
                                    symbol: id,
                                    arg_count,
                                });
                            }
                        }
                        SymbolKind::Const => self.error(
                            Diagnostic::error(
                                self.unit.source_file,
                                format!("`{callee}` is not a function"),
                            )
                            .with_code("LS0004")
                            .with_label(Label::primary(*callee_span, "")),
                        ),
                    },
                    found => {
                        let mut diagnostic = Diagnostic::error(
                            self.unit.source_file,
                            format!("function `{callee}` does not exist"),
                        )
                        .with_code("LS0004")
                        .with_label(Label::primary(*callee_span, ""));
                        if matches!(found, Lookup::FoundPrivate) {
                            diagnostic = diagnostic.with_note(notes::PRIVATE_SYMBOLS);
                        }
                        self.error(diagnostic);
                    }
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                self.lower_expr(lhs);
                self.lower_expr(rhs);
                self.ops.push(match op {
                    BinaryOp::Add => Op::Add,
                    BinaryOp::Subtract => Op::Subtract,
                    BinaryOp::Multiply => Op::Multiply,
                    BinaryOp::Divide => Op::Divide,
                });
            }
        }
    }

    /// Resolves a name against the unit's own namespace, then its imports
    /// in source order. First import that publicly exports the name wins.
    fn lookup_symbol(&mut self, name: &str) -> Lookup {
        let own_namespace = self.bound.unit_namespace(self.unit_index);
        if let Some(id) = self.bound.lookup(own_namespace, name) {
            return Lookup::Found(id);
        }
        let mut saw_private = false;
        for import in &self.unit.imports {
            let Some(namespace) = self.bound.namespace_id(&import.namespace) else {
                continue;
            };
            if let Some(id) = self.bound.lookup(namespace, name) {
                if self.bound.symbol(id).visibility == Visibility::Public {
                    if !self.used_imports.iter().any(|used| used == &import.namespace) {
                        self.used_imports.push(import.namespace.clone());
                    }
                    return Lookup::Found(id);
                }
                saw_private = true;
            }
        }
        if saw_private {
            Lookup::FoundPrivate
        } else {
            Lookup::NotFound
        }
    }
}

//! Declaration binding: turning the units of a source set into a symbol
//! registry, without touching method bodies.

use std::collections::HashMap;

use loomscript_foundation::{
    errors::{Diagnostic, Label},
    source::SourceFileId,
    span::{Span, Spanned},
};
use rayon::prelude::*;
use tracing::{info_span, trace};

use crate::{
    diagnostics::notes,
    sources::SourceSet,
    unit::{Decl, SourceUnit, Visibility},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Const,
    Function { param_count: usize },
}

/// Where a symbol came from.
#[derive(Debug, Clone)]
pub enum SymbolOrigin {
    Local {
        unit: usize,
        source_file: SourceFileId,
        span: Span,
    },
    External {
        /// Index into the source set's references.
        reference: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub namespace: NamespaceId,
    pub kind: SymbolKind,
    pub visibility: Visibility,
    pub origin: SymbolOrigin,
    pub doc: Option<String>,
}

/// The bound declaration state derived from one source set.
///
/// Read-only once binding completes; safe to share across threads and
/// stages. Owned by the source set that produced it.
#[derive(Debug, Default)]
pub struct BoundDeclarations {
    pub diagnostics: Vec<Diagnostic>,

    namespace_ids_by_name: HashMap<String, NamespaceId>,
    namespace_names_by_id: Vec<String>,

    symbols: Vec<Symbol>,
    symbol_ids_by_name: HashMap<(NamespaceId, String), SymbolId>,

    unit_namespaces: Vec<NamespaceId>,
}

impl BoundDeclarations {
    fn get_or_create_namespace(&mut self, name: &str) -> NamespaceId {
        if let Some(&id) = self.namespace_ids_by_name.get(name) {
            id
        } else {
            let id = NamespaceId(
                self.namespace_names_by_id
                    .len()
                    .try_into()
                    .expect("too many namespaces declared"),
            );
            self.namespace_ids_by_name.insert(name.to_owned(), id);
            self.namespace_names_by_id.push(name.to_owned());
            id
        }
    }

    pub fn namespace_id(&self, name: &str) -> Option<NamespaceId> {
        self.namespace_ids_by_name.get(name).copied()
    }

    pub fn namespace_name(&self, id: NamespaceId) -> &str {
        self.namespace_names_by_id
            .get(id.0 as usize)
            .map(|x| x.as_str())
            .expect("invalid namespace ID passed to namespace_name")
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn lookup(&self, namespace: NamespaceId, name: &str) -> Option<SymbolId> {
        self.symbol_ids_by_name
            .get(&(namespace, name.to_owned()))
            .copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &'_ Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| (SymbolId(index as u32), symbol))
    }

    /// The namespace the given unit declares into.
    pub fn unit_namespace(&self, unit_index: usize) -> NamespaceId {
        self.unit_namespaces[unit_index]
    }

    /// Whether any declaration diagnostic is an error or worse.
    pub fn has_errors(&self) -> bool {
        use loomscript_foundation::errors::Severity;
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity >= Severity::Error)
    }

    fn register_symbol(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        trace!(name = %symbol.name, ?id, "registering symbol");
        self.symbol_ids_by_name
            .insert((symbol.namespace, symbol.name.clone()), id);
        self.symbols.push(symbol);
        id
    }
}

/// Binds all units of a source set.
///
/// Deterministic given identical units, references, and options. Unit
/// binding fans out across the thread pool when the set's concurrency
/// option is on; the merge that assigns ids and detects conflicts is always
/// sequential in unit order, so diagnostics within one unit keep source
/// order regardless.
pub(crate) fn bind(set: &SourceSet) -> BoundDeclarations {
    let _span = info_span!("bind_declarations").entered();

    let fragments: Vec<UnitFragment> = if set.options().concurrent {
        set.units().par_iter().map(bind_unit).collect()
    } else {
        set.units().iter().map(bind_unit).collect()
    };

    merge(set, fragments)
}

struct UnitFragment {
    decls: Vec<DeclSummary>,
}

struct DeclSummary {
    name: String,
    span: Span,
    kind: SymbolKind,
    visibility: Visibility,
    doc: Option<String>,
    /// Problems found while looking at this declaration in isolation, in
    /// source order.
    diagnostics: Vec<Diagnostic>,
}

fn bind_unit(unit: &SourceUnit) -> UnitFragment {
    let decls = unit
        .decls
        .iter()
        .map(|decl| {
            let mut diagnostics = vec![];
            let kind = match decl {
                Decl::Const(_) => SymbolKind::Const,
                Decl::Function(function) => {
                    for (index, param) in function.params.iter().enumerate() {
                        let duplicate = function.params[..index]
                            .iter()
                            .any(|earlier| earlier.name == param.name);
                        if duplicate {
                            diagnostics.push(
                                Diagnostic::error(
                                    unit.source_file,
                                    format!("parameter `{}` is declared more than once", param.name),
                                )
                                .with_code("LS0007")
                                .with_label(Label::primary(param.span, "duplicate parameter")),
                            );
                        }
                    }
                    SymbolKind::Function {
                        param_count: function.params.len(),
                    }
                }
            };
            DeclSummary {
                name: decl.name().to_owned(),
                span: decl.span(),
                kind,
                visibility: decl.visibility(),
                doc: decl.doc().map(|doc| doc.to_owned()),
                diagnostics,
            }
        })
        .collect();
    UnitFragment { decls }
}

fn merge(set: &SourceSet, fragments: Vec<UnitFragment>) -> BoundDeclarations {
    let mut bound = BoundDeclarations::default();

    for (unit_index, (unit, fragment)) in set.units().iter().zip(fragments).enumerate() {
        let namespace = bound.get_or_create_namespace(&unit.namespace);
        bound.unit_namespaces.push(namespace);

        for decl in fragment.decls {
            bound.diagnostics.extend(decl.diagnostics);

            if let Some(existing) = bound.lookup(namespace, &decl.name) {
                let previous = match &bound.symbol(existing).origin {
                    SymbolOrigin::Local {
                        source_file, span, ..
                    } => Some((*source_file, *span)),
                    SymbolOrigin::External { .. } => None,
                };
                let mut diagnostic = Diagnostic::error(
                    unit.source_file,
                    format!(
                        "`{}` is declared more than once in namespace `{}`",
                        decl.name, unit.namespace
                    ),
                )
                .with_code("LS0001")
                .with_label(Label::primary(decl.span, "redeclared here"));
                if let Some((previous_file, previous_span)) = previous {
                    diagnostic = diagnostic.with_label(
                        Label::secondary(previous_span, "previous declaration is here")
                            .in_file(previous_file),
                    );
                }
                bound.diagnostics.push(diagnostic);
                continue;
            }

            bound.register_symbol(Symbol {
                name: decl.name,
                namespace,
                kind: decl.kind,
                visibility: decl.visibility,
                origin: SymbolOrigin::Local {
                    unit: unit_index,
                    source_file: unit.source_file,
                    span: decl.span,
                },
                doc: decl.doc,
            });
        }
    }

    // Reference metadata fills in whatever the local units did not declare
    // themselves; a local declaration always wins over an imported one.
    for (reference_index, reference) in set.references().iter().enumerate() {
        for export in &reference.exports {
            let namespace = bound.get_or_create_namespace(&export.namespace);
            if bound.lookup(namespace, &export.name).is_none() {
                bound.register_symbol(Symbol {
                    name: export.name.clone(),
                    namespace,
                    kind: export.kind,
                    visibility: Visibility::Public,
                    origin: SymbolOrigin::External {
                        reference: reference_index,
                    },
                    doc: None,
                });
            }
        }
    }

    // Imports can only be resolved once every namespace is known.
    for unit in set.units() {
        for import in &unit.imports {
            if bound.namespace_id(&import.namespace).is_none() {
                bound.diagnostics.push(
                    Diagnostic::error(
                        unit.source_file,
                        format!("namespace `{}` does not exist", import.namespace),
                    )
                    .with_code("LS0002")
                    .with_label(Label::primary(import.span, "imported here"))
                    .with_note(notes::SEPARATE_COMPILATION),
                );
            }
        }
    }

    bound
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loomscript_foundation::source::{SourceFile, SourceFileSet};

    use crate::{
        options::CompileOptions,
        sources::{ExportedSymbol, ExternalReference, SourceSet},
        unit::{ConstDecl, Decl, Import, Literal, SourceUnit, Visibility},
        SymbolKind, SymbolOrigin,
    };

    fn const_decl(name: &str) -> Decl {
        Decl::Const(ConstDecl {
            name: name.into(),
            span: (0..1).into(),
            visibility: Visibility::Public,
            doc: None,
            value: Literal::Int(1),
        })
    }

    fn set_of(units: Vec<(&str, Vec<Import>, Vec<Decl>)>, references: Vec<ExternalReference>) -> SourceSet {
        let mut files = SourceFileSet::new();
        let units = units
            .into_iter()
            .enumerate()
            .map(|(index, (namespace, imports, decls))| SourceUnit {
                source_file: files.add(SourceFile::new(
                    format!("Unit{index}.loom"),
                    format!("namespace {namespace}"),
                )),
                namespace: namespace.into(),
                namespace_span: (10..10 + namespace.len()).into(),
                imports,
                decls,
            })
            .collect();
        SourceSet::new(Arc::new(files), units, references, CompileOptions::default())
    }

    #[test]
    fn duplicate_declarations_are_reported_once_per_duplicate() {
        let set = set_of(
            vec![
                ("math", vec![], vec![const_decl("zero"), const_decl("zero")]),
                ("math", vec![], vec![const_decl("zero")]),
            ],
            vec![],
        );
        let bound = set.bound_declarations();
        let codes: Vec<_> = bound
            .diagnostics
            .iter()
            .filter_map(|d| d.code.as_deref())
            .collect();
        assert_eq!(codes, ["LS0001", "LS0001"]);
        // The first declaration is the one that sticks.
        let namespace = bound.namespace_id("math").unwrap();
        let symbol = bound.symbol(bound.lookup(namespace, "zero").unwrap());
        assert!(matches!(symbol.origin, SymbolOrigin::Local { unit: 0, .. }));
    }

    #[test]
    fn imports_resolve_against_units_and_references() {
        let set = set_of(
            vec![
                (
                    "app",
                    vec![
                        Import {
                            namespace: "util".into(),
                            span: (0..4).into(),
                        },
                        Import {
                            namespace: "nonexistent".into(),
                            span: (5..16).into(),
                        },
                    ],
                    vec![],
                ),
                ("util", vec![], vec![const_decl("helper")]),
            ],
            vec![ExternalReference {
                module_name: "strings".into(),
                exports: vec![ExportedSymbol {
                    namespace: "strings".into(),
                    name: "trim".into(),
                    kind: SymbolKind::Function { param_count: 1 },
                }],
            }],
        );
        let bound = set.bound_declarations();
        let codes: Vec<_> = bound
            .diagnostics
            .iter()
            .filter_map(|d| d.code.as_deref())
            .collect();
        assert_eq!(codes, ["LS0002"]);
        assert!(bound.namespace_id("strings").is_some());
    }

    #[test]
    fn local_declarations_shadow_reference_exports() {
        let set = set_of(
            vec![("util", vec![], vec![const_decl("version")])],
            vec![ExternalReference {
                module_name: "util".into(),
                exports: vec![ExportedSymbol {
                    namespace: "util".into(),
                    name: "version".into(),
                    kind: SymbolKind::Const,
                }],
            }],
        );
        let bound = set.bound_declarations();
        assert!(bound.diagnostics.is_empty());
        let namespace = bound.namespace_id("util").unwrap();
        let symbol = bound.symbol(bound.lookup(namespace, "version").unwrap());
        assert!(matches!(symbol.origin, SymbolOrigin::Local { .. }));
    }
}

//! End-to-end tests of the staged compilation pipeline: bind, diagnose,
//! compile methods, finalize, serialize.

use loomscript_compile::{
    compile_methods,
    emit::{serialize, OutputStreams, WrittenStreams},
    CompileOptions, EmitOptions, ErrorPolicy, ModuleArtifact, OutputKind, SourceSet, Stage,
    StateError,
};
use loomscript_image::sections::{ImageFlags, Summary};

mod fixtures {
    use std::sync::Arc;

    use loomscript_compile::{CompileOptions, SourceSet};
    use loomscript_foundation::source::{SourceFile, SourceFileSet};
    use loomscript_compile::unit::{
        BinaryOp, ConstDecl, Decl, Expr, FunctionDecl, Import, Literal, Param, SourceUnit, Stmt,
        Visibility,
    };

    pub fn name(name: &str, at: usize) -> Expr {
        Expr::Name {
            name: name.into(),
            span: (at..at + name.len()).into(),
        }
    }

    pub fn ret(value: Expr) -> Stmt {
        Stmt::Return {
            span: (0..6).into(),
            value: Some(value),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        let span = (0..1).into();
        Expr::Binary {
            op: BinaryOp::Add,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            span,
        }
    }

    pub fn function(name: &str, at: usize, params: &[&str], body: Vec<Stmt>) -> Decl {
        function_with_visibility(name, at, params, body, Visibility::Public)
    }

    pub fn function_with_visibility(
        name: &str,
        at: usize,
        params: &[&str],
        body: Vec<Stmt>,
        visibility: Visibility,
    ) -> Decl {
        Decl::Function(FunctionDecl {
            name: name.into(),
            span: (at..at + name.len()).into(),
            visibility,
            doc: None,
            params: params
                .iter()
                .map(|&name| Param {
                    name: name.into(),
                    span: (0..1).into(),
                })
                .collect(),
            body,
        })
    }

    pub fn constant(name: &str, at: usize, visibility: Visibility) -> Decl {
        Decl::Const(ConstDecl {
            name: name.into(),
            span: (at..at + name.len()).into(),
            visibility,
            doc: Some(format!("The `{name}` constant.")),
            value: Literal::Int(7),
        })
    }

    pub fn import(namespace: &str, at: usize) -> Import {
        Import {
            namespace: namespace.into(),
            span: (at..at + namespace.len()).into(),
        }
    }

    pub fn set_of(
        units: Vec<(&str, Vec<Import>, Vec<Decl>)>,
        options: CompileOptions,
    ) -> SourceSet {
        let mut files = SourceFileSet::new();
        let units = units
            .into_iter()
            .map(|(namespace, imports, decls)| SourceUnit {
                source_file: files.add(SourceFile::new(
                    format!("{namespace}.loom"),
                    format!("namespace {namespace}\n# unit body placeholder text follows here\n"),
                )),
                namespace: namespace.into(),
                namespace_span: (10..10 + namespace.len()).into(),
                imports,
                decls,
            })
            .collect();
        SourceSet::new(Arc::new(files), units, vec![], options)
    }
}

use fixtures::*;
use loomscript_compile::unit::Visibility;

fn math_set(options: CompileOptions) -> SourceSet {
    set_of(
        vec![(
            "math",
            vec![],
            vec![
                constant("scale", 20, Visibility::Public),
                function(
                    "add",
                    40,
                    &["a", "b"],
                    vec![ret(add(name("a", 50), name("b", 54)))],
                ),
            ],
        )],
        options,
    )
}

#[test]
fn the_full_pipeline_produces_a_parseable_image() {
    let set = math_set(CompileOptions::default());
    let mut artifact = ModuleArtifact::new("math");

    let compilation = compile_methods(&set, &EmitOptions::default(), &mut artifact).unwrap();
    assert!(compilation.success);
    assert!(compilation.diagnostics.is_empty());

    artifact
        .finalize(&set, &EmitOptions::default(), vec![])
        .unwrap();

    let mut image = vec![];
    let result = serialize(
        &mut artifact,
        &set,
        &mut OutputStreams {
            image: &mut image,
            metadata: None,
            debug: None,
            docs: None,
        },
        &EmitOptions::default(),
    )
    .unwrap();

    assert!(result.success);
    assert_eq!(result.written, WrittenStreams::IMAGE);
    assert_eq!(artifact.stage(), Stage::Serialized);

    let summary = Summary::parse(&image).unwrap();
    assert_eq!(summary.module_name, "math");
    assert_eq!(summary.symbol_table_len, 2);
    assert_eq!(summary.method_table_len, 1);
    assert!(summary.code_len > 0);
}

#[test]
fn serializing_twice_yields_byte_identical_images() {
    let set = math_set(CompileOptions::default());
    let mut artifact = ModuleArtifact::new("math");
    compile_methods(&set, &EmitOptions::default(), &mut artifact).unwrap();
    artifact
        .finalize(&set, &EmitOptions::default(), vec![])
        .unwrap();

    let mut serialize_once = || {
        let mut image = vec![];
        serialize(
            &mut artifact,
            &set,
            &mut OutputStreams {
                image: &mut image,
                metadata: None,
                debug: None,
                docs: None,
            },
            &EmitOptions::default(),
        )
        .unwrap();
        image
    };
    let first = serialize_once();
    let second = serialize_once();
    assert_eq!(first, second);
}

#[test]
fn serializing_an_open_module_fails_and_writes_no_bytes() {
    let set = math_set(CompileOptions::default());
    let mut artifact = ModuleArtifact::new("math");

    let mut image = vec![];
    let result = serialize(
        &mut artifact,
        &set,
        &mut OutputStreams {
            image: &mut image,
            metadata: None,
            debug: None,
            docs: None,
        },
        &EmitOptions::default(),
    );
    let error = result.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<StateError>(),
        Some(StateError::NotFinalized(Stage::Open))
    ));
    assert!(image.is_empty());
}

#[test]
fn declaration_errors_block_emission_under_fail_closed() {
    let set = set_of(
        vec![("app", vec![import("nowhere", 14)], vec![])],
        CompileOptions::default(),
    );
    assert_eq!(set.declaration_diagnostics().len(), 1);
    assert_eq!(
        set.declaration_diagnostics()[0].code.as_deref(),
        Some("LS0002")
    );

    let mut artifact = ModuleArtifact::new("app");
    let result = compile_methods(&set, &EmitOptions::default(), &mut artifact);
    assert!(matches!(result, Err(StateError::DeclarationErrors)));
}

#[test]
fn emit_anyway_still_produces_an_image_and_reports_the_errors() {
    let set = set_of(
        vec![(
            "app",
            vec![import("nowhere", 14)],
            vec![function("noop", 30, &[], vec![])],
        )],
        CompileOptions {
            error_policy: ErrorPolicy::EmitAnyway,
            ..CompileOptions::default()
        },
    );
    let mut artifact = ModuleArtifact::new("app");
    let compilation = compile_methods(&set, &EmitOptions::default(), &mut artifact).unwrap();
    assert!(compilation.success);

    artifact
        .finalize(&set, &EmitOptions::default(), vec![])
        .unwrap();
    let mut image = vec![];
    let result = serialize(
        &mut artifact,
        &set,
        &mut OutputStreams {
            image: &mut image,
            metadata: None,
            debug: None,
            docs: None,
        },
        &EmitOptions::default(),
    )
    .unwrap();

    // The image exists, but the run still reports failure because binding
    // found errors.
    assert!(!result.success);
    assert!(!image.is_empty());
    assert!(set
        .declaration_diagnostics()
        .iter()
        .any(|d| d.code.as_deref() == Some("LS0002")));
}

#[test]
fn every_method_error_surfaces_in_a_single_run() {
    let set = set_of(
        vec![
            (
                "alpha",
                vec![],
                vec![
                    function("first_broken", 20, &[], vec![ret(name("ghost", 30))]),
                    function("works", 60, &["x"], vec![ret(name("x", 70))]),
                ],
            ),
            (
                "beta",
                vec![],
                vec![function(
                    "second_broken",
                    20,
                    &[],
                    vec![ret(name("phantom", 30))],
                )],
            ),
        ],
        CompileOptions::default(),
    );
    let mut artifact = ModuleArtifact::new("app");
    let compilation = compile_methods(&set, &EmitOptions::default(), &mut artifact).unwrap();

    assert!(!compilation.success);
    assert_eq!(compilation.diagnostics.len(), 2);
    assert!(compilation
        .diagnostics
        .iter()
        .all(|d| d.code.as_deref() == Some("LS0003")));
    // The healthy sibling still compiled.
    assert_eq!(artifact.methods().len(), 1);
}

#[test]
fn binding_identical_sets_reports_identical_diagnostics() {
    let build = || {
        set_of(
            vec![
                ("one", vec![import("missing_a", 14)], vec![]),
                ("two", vec![import("missing_b", 14)], vec![]),
            ],
            CompileOptions {
                concurrent: false,
                ..CompileOptions::default()
            },
        )
    };
    let first: Vec<String> = build()
        .declaration_diagnostics()
        .iter()
        .map(|d| d.message.clone())
        .collect();
    let second: Vec<String> = build()
        .declaration_diagnostics()
        .iter()
        .map(|d| d.message.clone())
        .collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn metadata_stream_is_a_declarations_only_subset() {
    let set = set_of(
        vec![(
            "api",
            vec![],
            vec![
                constant("visible", 20, Visibility::Public),
                constant("hidden", 40, Visibility::Private),
            ],
        )],
        CompileOptions::default(),
    );
    let mut artifact = ModuleArtifact::new("api");
    compile_methods(&set, &EmitOptions::default(), &mut artifact).unwrap();
    artifact
        .finalize(&set, &EmitOptions::default(), vec![])
        .unwrap();

    let emit = |artifact: &mut ModuleArtifact, options: &EmitOptions| {
        let mut image = vec![];
        let mut metadata = vec![];
        let result = serialize(
            artifact,
            &set,
            &mut OutputStreams {
                image: &mut image,
                metadata: Some(&mut metadata),
                debug: None,
                docs: None,
            },
            options,
        )
        .unwrap();
        assert!(result.written.contains(WrittenStreams::METADATA));
        (Summary::parse(&image).unwrap(), Summary::parse(&metadata).unwrap())
    };

    let (primary, metadata) = emit(&mut artifact, &EmitOptions::default());
    assert_eq!(primary.symbol_table_len, 2);
    assert!(!primary.flags.contains(ImageFlags::METADATA_ONLY));
    assert_eq!(metadata.symbol_table_len, 1);
    assert!(metadata.flags.contains(ImageFlags::METADATA_ONLY));
    assert_eq!(metadata.code_len, 0);

    let (_, with_private) = emit(
        &mut artifact,
        &EmitOptions {
            include_private: true,
            ..EmitOptions::default()
        },
    );
    assert_eq!(with_private.symbol_table_len, 2);
}

#[test]
fn program_modules_require_an_entry_point() {
    let set = set_of(
        vec![("app", vec![], vec![function("helper", 20, &[], vec![])])],
        CompileOptions {
            output_kind: OutputKind::Program,
            ..CompileOptions::default()
        },
    );
    let mut artifact = ModuleArtifact::new("app");
    compile_methods(&set, &EmitOptions::default(), &mut artifact).unwrap();
    let advisories = artifact
        .finalize(&set, &EmitOptions::default(), vec![])
        .unwrap();
    assert!(advisories
        .iter()
        .any(|d| d.code.as_deref() == Some("LS0010")));

    let mut image = vec![];
    let result = serialize(
        &mut artifact,
        &set,
        &mut OutputStreams {
            image: &mut image,
            metadata: None,
            debug: None,
            docs: None,
        },
        &EmitOptions::default(),
    )
    .unwrap();
    assert!(!result.success);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.code.as_deref() == Some("LS0010")));
}

#[test]
fn documentation_and_debug_streams_are_written_on_request() {
    let set = math_set(CompileOptions::default());
    let mut artifact = ModuleArtifact::new("math");
    let options = EmitOptions {
        generate_docs: true,
        debug_info: loomscript_compile::DebugInfoMode::Separate,
        ..EmitOptions::default()
    };
    compile_methods(&set, &options, &mut artifact).unwrap();
    artifact.finalize(&set, &options, vec![]).unwrap();

    let mut image = vec![];
    let mut debug = vec![];
    let mut docs = vec![];
    let result = serialize(
        &mut artifact,
        &set,
        &mut OutputStreams {
            image: &mut image,
            metadata: None,
            debug: Some(&mut debug),
            docs: Some(&mut docs),
        },
        &options,
    )
    .unwrap();

    assert_eq!(
        result.written,
        WrittenStreams::IMAGE | WrittenStreams::DEBUG | WrittenStreams::DOCS
    );
    assert!(!debug.is_empty());
    let docs = String::from_utf8(docs).unwrap();
    assert!(docs.contains("`math.scale`"));
}

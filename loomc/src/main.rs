mod reader;
mod references;

use std::{fs::File, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, ValueEnum};
use loomscript_compile::{
    analyze, compile_methods,
    emit::{serialize, OutputStreams},
    lints::{EmptyFunction, IdentifierNaming},
    Analyzer, AnalyzerOptions, CancellationToken, CompileOptions, DebugInfoMode, EmbeddedResource,
    EmitOptions, ErrorPolicy, ModuleArtifact, OutputKind, SourceSet,
};
use loomscript_foundation::{
    errors::{sort_by_location, Diagnostic, Severity},
    source::{SourceFile, SourceFileSet},
};
use tracing::{error, info, info_span, metadata::LevelFilter, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use walkdir::WalkDir;

#[derive(Debug, Parser)]
pub struct Args {
    /// Directory containing the module's `.loom` source units.
    module: Utf8PathBuf,

    /// Directory to write output files into.
    #[clap(short = 'o', long, default_value = ".")]
    out_dir: Utf8PathBuf,

    /// Reference manifests of modules this one links against.
    #[clap(short = 'r', long)]
    reference: Vec<Utf8PathBuf>,

    /// Files to embed as resources in the image.
    #[clap(long)]
    resource: Vec<Utf8PathBuf>,

    /// Bind and compile one unit and one method at a time.
    #[clap(long)]
    sequential: bool,

    /// Build a runnable program instead of a library.
    #[clap(long)]
    program: bool,

    /// Emit an image even when binding or method compilation reports errors.
    #[clap(long)]
    emit_anyway: bool,

    /// Run the stock lint analyzers alongside declaration diagnostics.
    #[clap(long)]
    lint: bool,

    /// Analyzer settings, as `key=value` pairs.
    #[clap(long = "analyzer-setting")]
    analyzer_settings: Vec<String>,

    #[clap(long, value_enum, default_value = "none")]
    debug_info: DebugInfoArg,

    /// Also write a metadata-only image next to the primary one.
    #[clap(long)]
    metadata: bool,

    /// Emit a declarations-only primary image with no code segment.
    #[clap(long)]
    metadata_only: bool,

    /// Keep private symbols in metadata output.
    #[clap(long)]
    include_private: bool,

    /// Instrument method code with coverage points.
    #[clap(long)]
    coverage: bool,

    /// Collect `##` doc comments and write a documentation file.
    #[clap(long)]
    docs: bool,

    /// Overrides the module name recorded in the image.
    #[clap(long)]
    output_name: Option<String>,

    /// Output a performance trace (in Chrome trace event format) to the specified path. https://profiler.firefox.com/
    #[clap(long)]
    trace: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DebugInfoArg {
    None,
    Embedded,
    Separate,
}

impl From<DebugInfoArg> for DebugInfoMode {
    fn from(arg: DebugInfoArg) -> Self {
        match arg {
            DebugInfoArg::None => DebugInfoMode::None,
            DebugInfoArg::Embedded => DebugInfoMode::Embedded,
            DebugInfoArg::Separate => DebugInfoMode::Separate,
        }
    }
}

pub fn fallible_main(args: Args) -> anyhow::Result<()> {
    let _span = info_span!("loomc").entered();

    let module_name = get_module_name(&args.module)?;
    let source_paths = {
        let _span = info_span!("list_sources", %module_name).entered();
        let source_paths = list_source_files(&args.module)?;
        info!(source_file_count = source_paths.len());
        source_paths
    };

    let (files, file_ids) = {
        let _span = info_span!("load_sources").entered();
        let mut files = SourceFileSet::new();
        let mut file_ids = vec![];
        for path in &source_paths {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read source file at {path:?}"))?;
            file_ids.push(files.add(SourceFile::new(
                pretty_file_name(&args.module, path),
                source,
            )));
        }
        (Arc::new(files), file_ids)
    };

    let mut diagnostics = vec![];
    let units = {
        let _span = info_span!("read_units").entered();
        file_ids
            .iter()
            .filter_map(|&id| reader::read_unit(id, &files.get(id).source, &mut diagnostics))
            .collect::<Vec<_>>()
    };

    let references = args
        .reference
        .iter()
        .map(|path| references::read_manifest(path))
        .collect::<Result<Vec<_>, _>>()?;

    let options = CompileOptions {
        concurrent: !args.sequential,
        output_kind: if args.program {
            OutputKind::Program
        } else {
            OutputKind::Library
        },
        error_policy: if args.emit_anyway {
            ErrorPolicy::EmitAnyway
        } else {
            ErrorPolicy::FailClosed
        },
    };
    let fail_closed = options.error_policy == ErrorPolicy::FailClosed;
    let set = Arc::new(SourceSet::new(Arc::clone(&files), units, references, options));

    let emit_options = EmitOptions {
        include_private: args.include_private,
        debug_info: args.debug_info.into(),
        metadata_only: args.metadata_only,
        output_name: args.output_name.clone(),
        instrument_coverage: args.coverage,
        generate_docs: args.docs,
    };

    if args.lint {
        let _span = info_span!("diagnostics_with_analyzers").entered();
        let mut analyzer_options = AnalyzerOptions::default();
        for setting in &args.analyzer_settings {
            let (key, value) = setting.split_once('=').unwrap_or((setting.as_str(), ""));
            analyzer_options.set(key, value);
        }
        let analyzers: Vec<Arc<dyn Analyzer>> =
            vec![Arc::new(IdentifierNaming), Arc::new(EmptyFunction)];
        let handle = analyze(
            Arc::clone(&set),
            analyzers,
            analyzer_options,
            CancellationToken::new(),
        );
        match handle.wait().into_diagnostics() {
            Some(merged) => diagnostics.extend(merged),
            None => bail!("analysis was cancelled"),
        }
    } else {
        let _span = info_span!("diagnostics").entered();
        diagnostics.extend(set.declaration_diagnostics().iter().cloned());
    }

    if fail_closed && has_errors(&diagnostics) {
        report(diagnostics, &files);
        error!("compilation failed, no image emitted");
        return Ok(());
    }

    let mut artifact = ModuleArtifact::new(&module_name);
    let compilation = compile_methods(&set, &emit_options, &mut artifact)?;
    diagnostics.extend(compilation.diagnostics);
    if fail_closed && !compilation.success {
        report(diagnostics, &files);
        error!("compilation failed, no image emitted");
        return Ok(());
    }

    let resources = args
        .resource
        .iter()
        .map(|path| {
            Ok(EmbeddedResource {
                name: path
                    .file_name()
                    .ok_or_else(|| anyhow!("resource path {path:?} has no file name"))?
                    .to_owned(),
                data: std::fs::read(path)
                    .with_context(|| format!("cannot read resource file at {path:?}"))?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let advisories = artifact.finalize(&set, &emit_options, resources)?;
    diagnostics.extend(advisories.to_vec());
    if fail_closed && has_errors(&diagnostics) {
        report(diagnostics, &files);
        error!("compilation failed, no image emitted");
        return Ok(());
    }

    let output_name = emit_options
        .output_name
        .clone()
        .unwrap_or_else(|| module_name.clone());
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("cannot create output directory {:?}", args.out_dir))?;

    let mut image = create_output(&args.out_dir, &output_name, "limg")?;
    let mut metadata = args
        .metadata
        .then(|| create_output(&args.out_dir, &output_name, "meta.limg"))
        .transpose()?;
    let mut debug = (emit_options.debug_info == DebugInfoMode::Separate)
        .then(|| create_output(&args.out_dir, &output_name, "ldbg"))
        .transpose()?;
    let mut docs = args
        .docs
        .then(|| create_output(&args.out_dir, &output_name, "docs.md"))
        .transpose()?;

    let result = serialize(
        &mut artifact,
        &set,
        &mut OutputStreams {
            image: &mut image,
            metadata: metadata.as_mut().map(|file| file as &mut dyn std::io::Write),
            debug: debug.as_mut().map(|file| file as &mut dyn std::io::Write),
            docs: docs.as_mut().map(|file| file as &mut dyn std::io::Write),
        },
        &emit_options,
    )?;

    report(diagnostics, &files);
    if result.success {
        info!(written = ?result.written, "emitted module `{output_name}`");
    } else {
        warn!(written = ?result.written, "emitted module `{output_name}` with errors");
    }

    Ok(())
}

fn create_output(out_dir: &Utf8Path, name: &str, extension: &str) -> anyhow::Result<File> {
    let path = out_dir.join(format!("{name}.{extension}"));
    File::create(&path).with_context(|| format!("cannot create output file {path:?}"))
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|diagnostic| diagnostic.severity >= Severity::Error)
}

fn report(mut diagnostics: Vec<Diagnostic>, files: &SourceFileSet) {
    let _span = info_span!("emit_diagnostics").entered();
    sort_by_location(&mut diagnostics);
    for diagnostic in diagnostics {
        _ = diagnostic.emit_to_stderr(files);
    }
}

fn get_module_name(module: &Utf8Path) -> anyhow::Result<String> {
    module
        .file_name()
        .ok_or_else(|| anyhow!("path {module:?} has no module name"))
        .map(|module_name| module_name.to_owned())
}

fn list_source_files(module: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
    if !module.is_dir() {
        bail!("{module:?} is not a directory");
    }

    let mut source_file_paths = vec![];
    for entry in WalkDir::new(module) {
        let entry = entry?;
        let path = entry.path();
        if let Some(path) = Utf8Path::from_path(path) {
            if path.is_file() && path.extension() == Some("loom") {
                source_file_paths.push(path.to_owned());
            }
        } else {
            warn!("path contains invalid UTF-8: {path:?}");
        }
    }
    // Unit order decides diagnostic and symbol order; keep it independent of
    // the directory walk.
    source_file_paths.sort();
    Ok(source_file_paths)
}

fn pretty_file_name(module_root: &Utf8Path, source_file: &Utf8Path) -> String {
    let module_root = module_root.parent().unwrap_or(module_root);
    source_file
        .strip_prefix(module_root)
        .unwrap_or(source_file)
        .to_string()
}

fn main() {
    let args = Args::parse();

    let mut chrome_trace = args.trace.as_ref().map(|trace_path| {
        let (chrome_trace, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .file(trace_path)
            .include_args(true)
            .build();
        (Some(chrome_trace), guard)
    });

    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .with(chrome_trace.as_mut().and_then(|(ct, _)| ct.take()));

    tracing::subscriber::set_global_default(subscriber)
        .expect("cannot set default tracing subscriber");

    match fallible_main(args) {
        Ok(_) => (),
        Err(error) => error!("{error:?}"),
    }
}

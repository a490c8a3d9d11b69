//! Analyzer-augmented diagnostics.
//!
//! Plain declaration diagnostics are synchronous
//! ([`crate::SourceSet::declaration_diagnostics`]). This module is the
//! pipeline's one asynchronous stage: [`analyze`] drives a set of external
//! analyzers over the bound declarations on the thread pool and hands back
//! an [`AnalysisHandle`]; [`AnalysisHandle::wait`] is the single point at
//! which a caller suspends.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
};

use loomscript_foundation::errors::{pipe_all_diagnostics_into, Diagnostic};
use rayon::prelude::*;
use tracing::{debug, info_span};

use crate::{bind::BoundDeclarations, sources::SourceSet, unit::SourceUnit};

/// Analyzer configuration, typically derived from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerOptions {
    settings: HashMap<String, String>,
}

impl AnalyzerOptions {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(|x| x.as_str())
    }
}

/// An external, pluggable diagnostic pass over bound declarations.
///
/// Analyzers only read: they receive shared references and must not keep
/// state across units, because the engine is free to run them concurrently
/// with each other and (if [`Analyzer::parallel_units`] allows) across
/// units. Duplicate suppression is the analyzer's own business; the engine
/// reports whatever analyzers return.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether separate units may be analyzed concurrently. Return false to
    /// have units fed through in order, one at a time.
    fn parallel_units(&self) -> bool {
        true
    }

    fn analyze_unit(
        &self,
        unit: &SourceUnit,
        bound: &BoundDeclarations,
        options: &AnalyzerOptions,
    ) -> Vec<Diagnostic>;
}

/// Requests cancellation of an in-flight analysis.
///
/// Cancellation stops new analyzer work from being scheduled; work already
/// running finishes and its output is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How an analysis run ended.
///
/// `Cancelled` is distinct from both success and diagnostic failure: a
/// cancelled run never yields a partial diagnostic set dressed up as a
/// complete one.
#[derive(Debug)]
pub enum AnalysisOutcome {
    /// Declaration diagnostics first, then each analyzer's diagnostics in
    /// registration order.
    Complete(Vec<Diagnostic>),
    Cancelled,
}

impl AnalysisOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalysisOutcome::Cancelled)
    }

    pub fn into_diagnostics(self) -> Option<Vec<Diagnostic>> {
        match self {
            AnalysisOutcome::Complete(diagnostics) => Some(diagnostics),
            AnalysisOutcome::Cancelled => None,
        }
    }
}

/// A pending analysis run.
pub struct AnalysisHandle {
    receiver: mpsc::Receiver<AnalysisOutcome>,
}

impl AnalysisHandle {
    /// Blocks until the run completes or is cancelled.
    pub fn wait(self) -> AnalysisOutcome {
        self.receiver
            .recv()
            .expect("analysis task exited without reporting an outcome")
    }
}

/// Starts an analyzer-augmented diagnostics run.
///
/// Binding happens first (or is reused if already computed); analyzers then
/// run on the thread pool, concurrently with each other and - where an
/// analyzer allows it and the set's concurrency option is on - across
/// units. The caller keeps running and suspends on the returned handle
/// whenever it actually needs the result.
pub fn analyze(
    set: Arc<SourceSet>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    options: AnalyzerOptions,
    token: CancellationToken,
) -> AnalysisHandle {
    let (sender, receiver) = mpsc::channel();
    rayon::spawn(move || {
        let outcome = run(&set, &analyzers, &options, &token);
        // The caller may have dropped the handle; that is their loss, not
        // an error.
        _ = sender.send(outcome);
    });
    AnalysisHandle { receiver }
}

fn run(
    set: &SourceSet,
    analyzers: &[Arc<dyn Analyzer>],
    options: &AnalyzerOptions,
    token: &CancellationToken,
) -> AnalysisOutcome {
    let _span = info_span!("analyze").entered();

    let bound = set.bound_declarations();
    let mut merged = bound.diagnostics.clone();

    for analyzer in analyzers {
        if token.is_cancelled() {
            debug!(analyzer = analyzer.name(), "cancelled before scheduling");
            return AnalysisOutcome::Cancelled;
        }
        let _span = info_span!("run_analyzer", name = analyzer.name()).entered();

        let per_unit: Vec<Vec<Diagnostic>> =
            if analyzer.parallel_units() && set.options().concurrent {
                set.units()
                    .par_iter()
                    .map(|unit| {
                        if token.is_cancelled() {
                            vec![]
                        } else {
                            analyzer.analyze_unit(unit, bound, options)
                        }
                    })
                    .collect()
            } else {
                let mut per_unit = vec![];
                for unit in set.units() {
                    if token.is_cancelled() {
                        break;
                    }
                    per_unit.push(analyzer.analyze_unit(unit, bound, options));
                }
                per_unit
            };

        // Units skipped because of a cancellation mid-run would leave a
        // hole in the results; report the run as cancelled rather than
        // passing that off as complete.
        if token.is_cancelled() {
            return AnalysisOutcome::Cancelled;
        }
        pipe_all_diagnostics_into(&mut merged, per_unit.into_iter().flatten());
    }

    AnalysisOutcome::Complete(merged)
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc, Mutex};

    use loomscript_foundation::{
        errors::Diagnostic,
        source::{SourceFile, SourceFileSet},
    };

    use super::{analyze, Analyzer, AnalyzerOptions, CancellationToken};
    use crate::{
        bind::BoundDeclarations,
        options::CompileOptions,
        sources::SourceSet,
        unit::SourceUnit,
    };

    fn two_unit_set() -> Arc<SourceSet> {
        let mut files = SourceFileSet::new();
        let units = ["alpha", "beta"]
            .into_iter()
            .map(|namespace| SourceUnit {
                source_file: files.add(SourceFile::new(
                    format!("{namespace}.loom"),
                    format!("namespace {namespace}"),
                )),
                namespace: namespace.into(),
                namespace_span: (10..10 + namespace.len()).into(),
                imports: vec![],
                decls: vec![],
            })
            .collect();
        Arc::new(SourceSet::new(
            Arc::new(files),
            units,
            vec![],
            CompileOptions::default(),
        ))
    }

    struct NoteEverything(&'static str);

    impl Analyzer for NoteEverything {
        fn name(&self) -> &str {
            self.0
        }

        fn analyze_unit(
            &self,
            unit: &SourceUnit,
            _: &BoundDeclarations,
            _: &AnalyzerOptions,
        ) -> Vec<Diagnostic> {
            vec![Diagnostic::note(
                unit.source_file,
                format!("{} saw `{}`", self.0, unit.namespace),
            )]
        }
    }

    #[test]
    fn analyzer_diagnostics_merge_in_registration_order() {
        let set = two_unit_set();
        let outcome = analyze(
            set,
            vec![
                Arc::new(NoteEverything("first")),
                Arc::new(NoteEverything("second")),
            ],
            AnalyzerOptions::default(),
            CancellationToken::new(),
        )
        .wait();
        let diagnostics = outcome.into_diagnostics().unwrap();
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "first saw `alpha`",
                "first saw `beta`",
                "second saw `alpha`",
                "second saw `beta`",
            ]
        );
    }

    #[test]
    fn cancelling_before_the_run_yields_cancelled() {
        let set = two_unit_set();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = analyze(
            set,
            vec![Arc::new(NoteEverything("never"))],
            AnalyzerOptions::default(),
            token,
        )
        .wait();
        assert!(outcome.is_cancelled());
    }

    /// Blocks inside the first unit it sees until the test lets it finish.
    struct Blocker {
        started: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Analyzer for Blocker {
        fn name(&self) -> &str {
            "blocker"
        }

        fn parallel_units(&self) -> bool {
            false
        }

        fn analyze_unit(
            &self,
            unit: &SourceUnit,
            _: &BoundDeclarations,
            _: &AnalyzerOptions,
        ) -> Vec<Diagnostic> {
            _ = self.started.send(());
            _ = self.release.lock().unwrap().recv();
            vec![Diagnostic::note(unit.source_file, "blocker ran")]
        }
    }

    #[test]
    fn cancelling_mid_flight_never_reports_a_partial_result() {
        let set = two_unit_set();
        let (started_sender, started) = mpsc::channel();
        let (release_sender, release) = mpsc::channel();
        let token = CancellationToken::new();

        let handle = analyze(
            set,
            vec![
                Arc::new(Blocker {
                    started: started_sender,
                    release: Mutex::new(release),
                }),
                Arc::new(NoteEverything("after")),
            ],
            AnalyzerOptions::default(),
            token.clone(),
        );

        // Wait until the blocker is inside its first unit, then cancel and
        // let it finish. The second unit is never scheduled.
        started.recv().unwrap();
        token.cancel();
        release_sender.send(()).unwrap();

        assert!(handle.wait().is_cancelled());
    }
}

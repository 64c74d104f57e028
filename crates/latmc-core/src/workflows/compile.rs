use crate::core::interop::blob::BlobSet;
use crate::core::interop::sink::DataSink;
use crate::core::models::ports::ReferencePort;
use crate::engine::config::BuildConfig;
use crate::engine::context::{BuildScope, ModelContext};
use crate::engine::error::{BuildReport, EngineError};
use crate::engine::progress::{BuildStage, Progress, ProgressReporter};
use crate::engine::store::ReferenceStore;
use crate::engine::tasks;
use crate::engine::translator;
use crate::engine::validation::{ValidationIssue, ValidationReport, validate};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Outcome of a successful build pass.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub context: ModelContext,
    /// Encoded blobs of every active simulation, by simulation index.
    pub blobs: BTreeMap<usize, BlobSet>,
    pub validation: Vec<ValidationIssue>,
}

impl CompiledModel {
    pub fn total_bytes(&self) -> usize {
        self.blobs.values().map(BlobSet::total_bytes).sum()
    }
}

/// Builds every context from `port` and encodes every active simulation. Either the whole
/// pass succeeds or the report names the tier it failed in.
#[instrument(skip_all, name = "compile_workflow")]
pub fn run<P: ReferencePort + ?Sized>(
    port: &P,
    config: &BuildConfig,
    reporter: &ProgressReporter,
) -> Result<CompiledModel, BuildReport> {
    let mut warnings = ValidationReport::new();
    match compile(port, config, reporter, &mut warnings) {
        Ok((context, blobs)) => {
            info!(
                simulations = blobs.len(),
                warnings = warnings.issues().len(),
                "Build pass complete."
            );
            Ok(CompiledModel {
                context,
                blobs,
                validation: warnings.into_issues(),
            })
        }
        Err(error) => Err(BuildReport::new(error, warnings.into_issues())),
    }
}

/// Runs a pass against the store, holding its read lock until the pass is done so no
/// change can interleave with it.
pub fn run_with_store(
    store: &ReferenceStore,
    config: &BuildConfig,
    reporter: &ProgressReporter,
) -> Result<CompiledModel, BuildReport> {
    let data = store.read()?;
    run(&*data, config, reporter)
}

/// Runs a pass and hands its blobs to `sink`. The sink is committed only after every blob
/// was staged, so a failed build or a failed store leaves nothing behind.
#[instrument(skip_all, name = "compile_to_sink_workflow")]
pub fn run_to_sink<P: ReferencePort + ?Sized, S: DataSink + ?Sized>(
    port: &P,
    config: &BuildConfig,
    reporter: &ProgressReporter,
    sink: &mut S,
) -> Result<CompiledModel, BuildReport> {
    let compiled = run(port, config, reporter)?;

    reporter.report(Progress::StageStart {
        stage: BuildStage::Persistence,
    });
    let staged = compiled
        .blobs
        .values()
        .try_for_each(|blobs| blobs.store_into(sink))
        .and_then(|()| sink.commit());
    if let Err(error) = staged {
        sink.abort();
        return Err(BuildReport::new(EngineError::from(error), compiled.validation));
    }
    let stored: usize = compiled.blobs.values().map(BlobSet::len).sum();
    info!(blobs = stored, bytes = compiled.total_bytes(), "Blobs persisted.");
    reporter.report(Progress::StageFinish {
        stage: BuildStage::Persistence,
        objects: stored,
    });
    Ok(compiled)
}

fn compile<P: ReferencePort + ?Sized>(
    port: &P,
    config: &BuildConfig,
    reporter: &ProgressReporter,
    warnings: &mut ValidationReport,
) -> Result<(ModelContext, BTreeMap<usize, BlobSet>), EngineError> {
    let scope = BuildScope::new(port, config, reporter);
    let start = |stage| reporter.report(Progress::StageStart { stage });
    let finish = |stage, objects| reporter.report(Progress::StageFinish { stage, objects });

    // === Phase 0: Advisory validation ===
    start(BuildStage::Validation);
    warnings.extend(validate(port).into_issues());
    for issue in warnings.issues() {
        reporter.report(Progress::Message(issue.to_string()));
    }
    finish(BuildStage::Validation, warnings.issues().len());

    let mut context = ModelContext::new();

    // === Phase 1: Structure ===
    start(BuildStage::Structure);
    let structure = tasks::structure::run(&scope)?;
    finish(BuildStage::Structure, structure.pair_models.len() + structure.group_models.len());
    context.structure = Some(structure);

    // === Phase 2: Energy ===
    start(BuildStage::Energy);
    let energy = tasks::energy::run(&scope, context.structure()?)?;
    finish(BuildStage::Energy, energy.pair_order.len() + energy.group_order.len());
    context.energy = Some(energy);

    // === Phase 3: Transitions ===
    start(BuildStage::Transition);
    let transition = tasks::transition::run(&scope, &context)?;
    finish(BuildStage::Transition, transition.transitions.len());
    context.transition = Some(transition);

    // === Phase 4: Simulations ===
    start(BuildStage::Simulation);
    let (simulations, issues) = tasks::simulation::run_all(&scope, &context)?;
    for issue in &issues {
        reporter.report(Progress::Message(issue.to_string()));
    }
    warnings.extend(issues);
    finish(BuildStage::Simulation, simulations.len());
    context.simulations = simulations;

    // === Phase 5: Translation ===
    start(BuildStage::Translation);
    let mut blobs = BTreeMap::new();
    for simulation in &context.simulations {
        let set = translator::translate(&context, simulation)?;
        if config.verify_output {
            translator::verify(&set)?;
        }
        blobs.insert(simulation.simulation, set);
    }
    finish(BuildStage::Translation, blobs.values().map(BlobSet::len).sum());

    Ok((context, blobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interop::blob::BlobKind;
    use crate::core::interop::sink::{DirectorySink, MemorySink, SinkError};
    use crate::core::models::transition::ConnectorKind;
    use crate::core::models::reference::ReferenceData;
    use crate::engine::config::BuildConfigBuilder;
    use crate::engine::error::FailureTier;
    use crate::engine::tasks::structure::tests::cubic_reference;
    use crate::engine::translator::blob_key;
    use std::sync::Mutex;

    fn compile_default(data: &ReferenceData) -> Result<CompiledModel, BuildReport> {
        run(data, &BuildConfig::default(), &ProgressReporter::new())
    }

    #[test]
    fn cubic_reference_compiles_end_to_end() {
        let compiled = compile_default(&cubic_reference()).unwrap();
        assert!(compiled.validation.is_empty());
        assert_eq!(compiled.context.simulations.len(), 1);
        assert_eq!(compiled.blobs.len(), 1);
        assert!(compiled.total_bytes() > 0);
    }

    #[test]
    fn stages_are_reported_in_order() {
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event: Progress| {
            if let Progress::StageStart { stage } = event {
                events.lock().unwrap().push(stage);
            }
        }));
        let mut sink = MemorySink::new();
        run_to_sink(&cubic_reference(), &BuildConfig::default(), &reporter, &mut sink).unwrap();
        drop(reporter);
        assert_eq!(
            events.into_inner().unwrap(),
            vec![
                BuildStage::Validation,
                BuildStage::Structure,
                BuildStage::Energy,
                BuildStage::Transition,
                BuildStage::Simulation,
                BuildStage::Translation,
                BuildStage::Persistence,
            ]
        );
    }

    #[test]
    fn warnings_travel_with_the_result() {
        let mut data = cubic_reference();
        data.simulations[0].seed = None;
        let config = BuildConfigBuilder::new()
            .geometry_tolerance(1e-6)
            .fallback_seed(7)
            .build()
            .unwrap();
        let compiled = run(&data, &config, &ProgressReporter::new()).unwrap();
        assert_eq!(compiled.validation.len(), 1);
        assert_eq!(compiled.context.simulations[0].seed, 7);
    }

    #[test]
    fn ring_transition_fails_fatally_and_stores_nothing() {
        let mut data = cubic_reference();
        data.kinetic_transitions[0].geometry = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        data.abstract_transitions[0].groups = vec![0, 0, 0];
        data.abstract_transitions[0].connectors = vec![ConnectorKind::Dynamic; 2];
        let mut sink = MemorySink::new();
        let report = run_to_sink(&data, &BuildConfig::default(), &ProgressReporter::new(), &mut sink).unwrap_err();
        assert_eq!(report.tier, FailureTier::Fatal);
        assert!(matches!(report.error, EngineError::RingTransition { .. }));
        assert!(sink.is_empty());
    }

    #[test]
    fn invalid_simulation_fails_in_the_validation_tier() {
        let mut data = cubic_reference();
        data.simulations[0].transitions.push(9);
        let report = compile_default(&data).unwrap_err();
        assert_eq!(report.tier, FailureTier::Validation);
    }

    #[test]
    fn store_pass_sees_a_consistent_snapshot() {
        let store = ReferenceStore::new(cubic_reference());
        let compiled = run_with_store(&store, &BuildConfig::default(), &ProgressReporter::new()).unwrap();
        assert_eq!(compiled.blobs.len(), 1);
    }

    #[test]
    fn directory_sink_receives_every_blob() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path());
        let compiled = run_to_sink(
            &cubic_reference(),
            &BuildConfig::default(),
            &ProgressReporter::new(),
            &mut sink,
        )
        .unwrap();
        for key in compiled.blobs[&0].keys() {
            assert!(sink.path_for(key).is_file(), "missing {key}");
        }
        assert!(sink.path_for(&blob_key(0, BlobKind::LatticeInfo, None)).is_file());
    }

    /// Accepts `remaining` blobs, then fails every further store.
    #[derive(Default)]
    struct FailingSink {
        remaining: usize,
        staged: Vec<String>,
        committed: Vec<String>,
        aborted: bool,
    }

    impl DataSink for FailingSink {
        fn store(&mut self, key: &str, _header: &[u8], _payload: &[u8]) -> Result<(), SinkError> {
            if self.remaining == 0 {
                return Err(SinkError::Io {
                    key: key.to_string(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.remaining -= 1;
            self.staged.push(key.to_string());
            Ok(())
        }

        fn commit(&mut self) -> Result<(), SinkError> {
            self.committed.append(&mut self.staged);
            Ok(())
        }

        fn abort(&mut self) {
            self.staged.clear();
            self.aborted = true;
        }
    }

    #[test]
    fn store_failure_part_way_commits_nothing() {
        let mut sink = FailingSink {
            remaining: 3,
            ..Default::default()
        };
        let report = run_to_sink(
            &cubic_reference(),
            &BuildConfig::default(),
            &ProgressReporter::new(),
            &mut sink,
        )
        .unwrap_err();
        assert_eq!(report.tier, FailureTier::Fatal);
        assert!(matches!(report.error, EngineError::Sink(_)));
        assert!(sink.aborted);
        assert!(sink.staged.is_empty());
        assert!(sink.committed.is_empty());
    }

    #[test]
    fn directory_sink_is_left_empty_when_a_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the staging directory belongs makes every store fail.
        std::fs::write(dir.path().join(".staging"), b"").unwrap();
        let mut sink = DirectorySink::new(dir.path());
        let report = run_to_sink(
            &cubic_reference(),
            &BuildConfig::default(),
            &ProgressReporter::new(),
            &mut sink,
        )
        .unwrap_err();
        assert!(matches!(report.error, EngineError::Sink(_)));
        assert!(!sink.path_for(&blob_key(0, BlobKind::LatticeInfo, None)).exists());
    }
}

use crate::analysis::{AnalysisOptions, GraphAnalysisReport, GraphAnalyzer};
use crate::config::IndexerConfig;
use crate::extractor::{default_extractors, ExtractionContext, Extractor};
use crate::graph::DependencyGraph;
use crate::live::{LiveRegistry, NullRegistry, SnapshotRegistry};
use crate::orchestrator::{ExtractorFailure, ExtractorSummary, Orchestrator, OrchestratorConfig};
use crate::sink::{JsonDirectorySink, UnitSink};
use crate::snapshot::{ChangeSet, IndexManifest, ManifestStore};
use crate::source::{FsSourceReader, SourceReader};
use crate::unit::ExtractedUnit;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything one run produced
#[derive(Debug)]
pub struct IndexOutput {
    pub units: Vec<ExtractedUnit>,
    pub graph: DependencyGraph,
    pub report: GraphAnalysisReport,
    /// Against the manifest left by the previous run in the output directory
    pub changes: ChangeSet,
    /// Added and modified units, units sharing a file with a change, and the
    /// transitive dependents of those and of removed units
    pub affected: BTreeSet<String>,
    pub failures: Vec<ExtractorFailure>,
    pub per_extractor: Vec<ExtractorSummary>,
}

/// Reader, registry, extractors, graph, analysis and sink wired into one pipeline
pub struct Indexer {
    config: IndexerConfig,
    extractors: Vec<Arc<dyn Extractor>>,
    sink: Arc<dyn UnitSink>,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        let sink = Arc::new(JsonDirectorySink::new(config.output_dir()));
        Self {
            config,
            extractors: default_extractors(),
            sink,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn UnitSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_extractors(mut self, extractors: Vec<Arc<dyn Extractor>>) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<IndexOutput> {
        let root = &self.config.root;
        if !root.exists() {
            anyhow::bail!("Path does not exist: {}", root.display());
        }
        if !root.is_dir() {
            anyhow::bail!("Path is not a directory: {}", root.display());
        }
        tracing::info!("Indexing codebase at: {}", root.display());

        let registry: Arc<dyn LiveRegistry> = match &self.config.registry_snapshot {
            Some(path) => {
                let registry = SnapshotRegistry::load(path)
                    .await
                    .context("Failed to load registry snapshot")?;
                tracing::info!("Using registry snapshot {}", path.display());
                Arc::new(registry)
            }
            None => Arc::new(NullRegistry),
        };
        let reader: Arc<dyn SourceReader> =
            Arc::new(FsSourceReader::new(root.clone()).with_max_files(self.config.max_files));

        // Building the model index walks the tree, so keep it off the async workers
        let chunk_threshold = self.config.chunk_threshold;
        let ctx = tokio::task::spawn_blocking(move || {
            ExtractionContext::discover(reader, registry).with_chunk_threshold(chunk_threshold)
        })
        .await
        .context("Model discovery task failed")?;

        let orchestrator = Orchestrator::new(
            self.extractors.clone(),
            OrchestratorConfig {
                concurrency: self.config.concurrency.unwrap_or(self.extractors.len()).max(1),
                extractor_timeout: self.config.extractor_timeout,
            },
        );
        let run = orchestrator.run(Arc::new(ctx)).await;

        let graph = DependencyGraph::build(&run.units);
        let report = GraphAnalyzer::new(&graph).report(AnalysisOptions {
            hub_limit: self.config.hub_limit,
            max_cycles: self.config.max_cycles,
        });

        let manifest = IndexManifest::from_units(&run.units);
        let previous = match ManifestStore::in_dir(&self.config.output_dir()).load().await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Ignoring unreadable manifest, treating run as fresh: {}", e);
                None
            }
        };
        let changes = match &previous {
            Some(previous) => manifest.diff(previous),
            None => manifest.initial_changes(),
        };
        // Removed units have no file in this run; their dependents are found through dangling edges
        let mut affected = graph.affected_by(&manifest.changed_files(previous.as_ref(), &changes));
        let changed_ids: Vec<&String> = changes
            .added
            .iter()
            .chain(&changes.modified)
            .chain(&changes.removed)
            .collect();
        affected.extend(graph.affected_by_ids(&changed_ids));
        tracing::info!(
            "Changes since last run: {} added, {} modified, {} removed, {} affected",
            changes.added.len(),
            changes.modified.len(),
            changes.removed.len(),
            affected.len()
        );

        self.sink.write_units(&run.units).await.context("Failed to write units")?;
        self.sink
            .write_graph(&graph.to_data())
            .await
            .context("Failed to write dependency graph")?;
        self.sink
            .write_analysis(&report)
            .await
            .context("Failed to write graph analysis")?;
        self.sink
            .write_manifest(&manifest)
            .await
            .context("Failed to write manifest")?;

        tracing::info!(
            "Indexed {} units, {} edges, {} failed extractors",
            run.units.len(),
            graph.edge_count(),
            run.failures.len()
        );

        Ok(IndexOutput {
            units: run.units,
            graph,
            report,
            changes,
            affected,
            failures: run.failures,
            per_extractor: run.per_extractor,
        })
    }
}

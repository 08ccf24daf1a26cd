//! Destinations for indexing output.
//!
//! The pipeline hands every artifact to a [`UnitSink`] as plain serializable
//! records. [`JsonDirectorySink`] lays them out as JSON files plus Mermaid
//! diagrams; [`MemorySink`] keeps them for embedders and tests.

use crate::analysis::GraphAnalysisReport;
use crate::error::SinkError;
use crate::graph::GraphData;
use crate::render::MermaidRenderer;
use crate::snapshot::{IndexManifest, ManifestStore};
use crate::unit::{ExtractedUnit, UnitType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

pub const UNITS_DIR: &str = "units";
pub const GRAPH_FILE: &str = "dependency_graph.json";
pub const ANALYSIS_FILE: &str = "graph_analysis.json";
pub const DEPENDENCY_MAP_FILE: &str = "dependency_map.mmd";
pub const TYPE_SUMMARY_FILE: &str = "unit_types.mmd";

#[async_trait::async_trait]
pub trait UnitSink: Send + Sync {
    async fn write_units(&self, units: &[ExtractedUnit]) -> Result<(), SinkError>;
    async fn write_graph(&self, graph: &GraphData) -> Result<(), SinkError>;
    async fn write_analysis(&self, report: &GraphAnalysisReport) -> Result<(), SinkError>;
    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<(), SinkError>;
}

/// Writes each artifact under one output directory:
/// `units/<type>.json`, `dependency_graph.json`, `graph_analysis.json`,
/// `manifest.json`, `dependency_map.mmd` and `unit_types.mmd`
pub struct JsonDirectorySink {
    dir: PathBuf,
    renderer: MermaidRenderer,
}

impl JsonDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            renderer: MermaidRenderer::default(),
        }
    }

    pub fn with_renderer(mut self, renderer: MermaidRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, what: &'static str, value: &T) -> Result<(), SinkError> {
        let data = serde_json::to_string_pretty(value).map_err(|source| SinkError::Serialize { what, source })?;
        self.write_text(path, data).await
    }

    async fn write_text(&self, path: &Path, data: String) -> Result<(), SinkError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, data).await.map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait::async_trait]
impl UnitSink for JsonDirectorySink {
    async fn write_units(&self, units: &[ExtractedUnit]) -> Result<(), SinkError> {
        let units_dir = self.dir.join(UNITS_DIR);
        // Types that vanished since the last run must not leave stale files
        if fs::try_exists(&units_dir).await.unwrap_or(false) {
            fs::remove_dir_all(&units_dir).await.map_err(|source| SinkError::Io {
                path: units_dir.clone(),
                source,
            })?;
        }

        let mut by_type: BTreeMap<UnitType, Vec<&ExtractedUnit>> = BTreeMap::new();
        for unit in units {
            by_type.entry(unit.unit_type).or_default().push(unit);
        }
        for (unit_type, group) in &by_type {
            let path = units_dir.join(format!("{}.json", unit_type.as_str()));
            self.write_json(&path, "units", group).await?;
        }

        let summary = self.renderer.type_summary(units);
        self.write_text(&self.dir.join(TYPE_SUMMARY_FILE), summary).await?;
        tracing::info!("Wrote {} units in {} files to {}", units.len(), by_type.len(), units_dir.display());
        Ok(())
    }

    async fn write_graph(&self, graph: &GraphData) -> Result<(), SinkError> {
        self.write_json(&self.dir.join(GRAPH_FILE), "dependency graph", graph).await?;
        let map = self.renderer.dependency_map(graph);
        self.write_text(&self.dir.join(DEPENDENCY_MAP_FILE), map).await
    }

    async fn write_analysis(&self, report: &GraphAnalysisReport) -> Result<(), SinkError> {
        self.write_json(&self.dir.join(ANALYSIS_FILE), "graph analysis", report).await
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<(), SinkError> {
        ManifestStore::in_dir(&self.dir).save(manifest).await?;
        Ok(())
    }
}

/// Keeps the last value of each artifact in memory
#[derive(Default)]
pub struct MemorySink {
    units: Mutex<Vec<ExtractedUnit>>,
    graph: Mutex<Option<GraphData>>,
    analysis: Mutex<Option<GraphAnalysisReport>>,
    manifest: Mutex<Option<IndexManifest>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn units(&self) -> Vec<ExtractedUnit> {
        self.units.lock().await.clone()
    }

    pub async fn graph(&self) -> Option<GraphData> {
        self.graph.lock().await.clone()
    }

    pub async fn analysis(&self) -> Option<GraphAnalysisReport> {
        self.analysis.lock().await.clone()
    }

    pub async fn manifest(&self) -> Option<IndexManifest> {
        self.manifest.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl UnitSink for MemorySink {
    async fn write_units(&self, units: &[ExtractedUnit]) -> Result<(), SinkError> {
        *self.units.lock().await = units.to_vec();
        Ok(())
    }

    async fn write_graph(&self, graph: &GraphData) -> Result<(), SinkError> {
        *self.graph.lock().await = Some(graph.clone());
        Ok(())
    }

    async fn write_analysis(&self, report: &GraphAnalysisReport) -> Result<(), SinkError> {
        *self.analysis.lock().await = Some(report.clone());
        Ok(())
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<(), SinkError> {
        *self.manifest.lock().await = Some(manifest.clone());
        Ok(())
    }
}

//! Extractor contract and the shipped pattern-recognizer families.
//!
//! Every family implements [`Extractor`]: discover candidates (files from a
//! glob, or objects from live reflection), then turn each candidate into zero
//! or more units. A candidate that does not match the family's signature is
//! an ordinary `None`, never an error.

mod common;
pub mod controller;
pub mod engine;
pub mod factory;
pub mod graphql;
pub mod job;
pub mod mailer;
pub mod middleware;
pub mod model;
pub mod rake_task;
pub mod route;
pub mod service;
pub mod state_machine;

pub use controller::ControllerExtractor;
pub use engine::EngineExtractor;
pub use factory::FactoryExtractor;
pub use graphql::GraphqlTypeExtractor;
pub use job::JobExtractor;
pub use mailer::MailerExtractor;
pub use middleware::MiddlewareExtractor;
pub use model::ModelExtractor;
pub use rake_task::RakeTaskExtractor;
pub use route::RouteExtractor;
pub use service::ServiceExtractor;
pub use state_machine::StateMachineExtractor;

use crate::live::{LiveObject, LiveRegistry};
use crate::parser::CodeParser;
use crate::scanner::{DependencyScanner, ModelNameIndex};
use crate::source::SourceReader;
use crate::unit::ExtractedUnit;
use anyhow::Result;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Units larger than this many lines get sub-chunks
pub const DEFAULT_CHUNK_THRESHOLD: usize = 200;
pub const SCHEMA_PATH: &str = "db/schema.rb";

/// One concrete source handed to an extractor
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// Repository-relative file path
    File(PathBuf),
    Live(LiveObject),
}

impl Candidate {
    pub fn label(&self) -> String {
        match self {
            Candidate::File(path) => path.display().to_string(),
            Candidate::Live(object) => object.label(),
        }
    }
}

/// Read-only inputs shared by every extractor for one run. Lookups that
/// several candidates need are computed on first use and live as long as
/// the context, so each run sees the tree as it is now.
pub struct ExtractionContext {
    reader: Arc<dyn SourceReader>,
    registry: Arc<dyn LiveRegistry>,
    scanner: DependencyScanner,
    parser: CodeParser,
    chunk_threshold: usize,
    schema: OnceCell<Option<String>>,
    graphql_names: OnceCell<HashMap<String, String>>,
}

impl ExtractionContext {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        registry: Arc<dyn LiveRegistry>,
        models: Arc<ModelNameIndex>,
    ) -> Self {
        Self {
            reader,
            registry,
            scanner: DependencyScanner::new(models),
            parser: CodeParser::new(),
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            schema: OnceCell::new(),
            graphql_names: OnceCell::new(),
        }
    }

    /// Build the model-name index from the reader and registry, then the context
    pub fn discover(reader: Arc<dyn SourceReader>, registry: Arc<dyn LiveRegistry>) -> Self {
        let parser = CodeParser::new();
        let models = ModelNameIndex::discover(reader.as_ref(), registry.as_ref(), &parser);
        tracing::info!("Model name index built: {} models", models.len());
        Self::new(reader, registry, Arc::new(models))
    }

    pub fn with_chunk_threshold(mut self, lines: usize) -> Self {
        self.chunk_threshold = lines;
        self
    }

    pub fn reader(&self) -> &dyn SourceReader {
        self.reader.as_ref()
    }

    pub fn registry(&self) -> &dyn LiveRegistry {
        self.registry.as_ref()
    }

    pub fn scanner(&self) -> &DependencyScanner {
        &self.scanner
    }

    pub fn models(&self) -> &ModelNameIndex {
        self.scanner.model_index()
    }

    pub fn parser(&self) -> &CodeParser {
        &self.parser
    }

    pub fn chunk_threshold(&self) -> usize {
        self.chunk_threshold
    }

    /// Contents of `db/schema.rb`, read once per run
    pub fn schema(&self) -> Option<&str> {
        self.schema
            .get_or_init(|| {
                let path = Path::new(SCHEMA_PATH);
                if !self.reader.exists(path) {
                    return None;
                }
                match self.reader.read(path) {
                    Ok(schema) => Some(schema),
                    Err(e) => {
                        tracing::warn!("Failed to read {}: {}", SCHEMA_PATH, e);
                        None
                    }
                }
            })
            .as_deref()
    }

    /// Exposed GraphQL type name to defining class, from reflection
    pub fn graphql_names(&self) -> &HashMap<String, String> {
        self.graphql_names.get_or_init(|| {
            self.registry
                .schema_types()
                .into_iter()
                .map(|t| (t.graphql_name.clone().unwrap_or_else(|| t.name.clone()), t.name))
                .collect()
        })
    }
}

/// A pattern recognizer for one family of code entities
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Enumerate candidates. A missing directory or unavailable reflection is
    /// an empty list, not an error.
    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>>;

    /// Turn one candidate into a unit; `Ok(None)` when it is not this
    /// family's kind of thing.
    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>>;

    /// Families whose candidates hold several entities (a rake file, a
    /// factory file) override this.
    fn try_extract_many(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Vec<ExtractedUnit>> {
        Ok(self.try_extract(ctx, candidate)?.into_iter().collect())
    }

    /// Extract one candidate, logging and absorbing failures
    fn extract_one(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Option<ExtractedUnit> {
        match self.try_extract(ctx, candidate) {
            Ok(unit) => unit,
            Err(e) => {
                tracing::warn!("{}: failed to extract {}: {:#}", self.name(), candidate.label(), e);
                None
            }
        }
    }

    /// Discover and extract every candidate. A failing candidate is logged
    /// and skipped; the rest of the batch still runs. A failed discovery
    /// yields an empty batch.
    fn extract_all(&self, ctx: &ExtractionContext) -> Result<Vec<ExtractedUnit>> {
        let candidates = match self.discover(ctx) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("{}: discovery failed, extracting nothing: {:#}", self.name(), e);
                return Ok(Vec::new());
            }
        };
        tracing::debug!("{}: {} candidates", self.name(), candidates.len());

        let mut units = Vec::new();
        for candidate in &candidates {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_extract_many(ctx, candidate)));
            match outcome {
                Ok(Ok(extracted)) => units.extend(extracted),
                Ok(Err(e)) => {
                    tracing::warn!("{}: failed to extract {}: {:#}", self.name(), candidate.label(), e);
                }
                Err(_) => {
                    tracing::warn!("{}: extraction panicked on {}", self.name(), candidate.label());
                }
            }
        }
        Ok(units)
    }
}

/// Every shipped family, runtime-backed ones first so their units win
/// identifier collisions.
pub fn default_extractors() -> Vec<Arc<dyn Extractor>> {
    vec![
        Arc::new(RouteExtractor),
        Arc::new(MiddlewareExtractor),
        Arc::new(EngineExtractor),
        Arc::new(GraphqlTypeExtractor),
        Arc::new(ModelExtractor),
        Arc::new(JobExtractor),
        Arc::new(ControllerExtractor),
        Arc::new(MailerExtractor),
        Arc::new(ServiceExtractor),
        Arc::new(StateMachineExtractor),
        Arc::new(RakeTaskExtractor),
        Arc::new(FactoryExtractor),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::live::{NullRegistry, RegistrySnapshot, SnapshotRegistry};
    use crate::source::MemorySourceReader;

    pub fn context(reader: MemorySourceReader) -> ExtractionContext {
        ExtractionContext::discover(Arc::new(reader), Arc::new(NullRegistry))
    }

    pub fn live_context(reader: MemorySourceReader, snapshot: serde_json::Value) -> ExtractionContext {
        let snapshot: RegistrySnapshot = serde_json::from_value(snapshot).unwrap();
        ExtractionContext::discover(Arc::new(reader), Arc::new(SnapshotRegistry::new(snapshot)))
    }
}

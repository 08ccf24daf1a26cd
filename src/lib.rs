//! Static indexer for Rails codebases.
//!
//! Pattern extractors turn repository sources (and, when a reflection
//! snapshot is supplied, the live object model) into [`ExtractedUnit`]s.
//! The [`Orchestrator`] runs them in isolation and merges their output, the
//! [`DependencyGraph`] links units by identifier, and the [`GraphAnalyzer`]
//! reports orphans, dead ends, hubs and cycles. [`Indexer`] wires the whole
//! pipeline to a [`UnitSink`].

pub mod analysis;
pub mod config;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod indexer;
pub mod live;
pub mod orchestrator;
pub mod parser;
pub mod render;
pub mod scanner;
pub mod sink;
pub mod snapshot;
pub mod source;
pub mod unit;

pub use analysis::{AnalysisOptions, GraphAnalysisReport, GraphAnalyzer};
pub use config::IndexerConfig;
pub use extractor::{default_extractors, Candidate, ExtractionContext, Extractor};
pub use graph::{DependencyGraph, GraphData};
pub use indexer::{IndexOutput, Indexer};
pub use orchestrator::{ExtractionRun, Orchestrator, OrchestratorConfig};
pub use sink::{JsonDirectorySink, MemorySink, UnitSink};
pub use unit::{Dependency, DependencyKind, ExtractedUnit, UnitType};

//! Runs every registered extractor over one shared context and merges their
//! output into a single identifier-unique unit list.
//!
//! Extractors run on the blocking pool, a bounded number at a time. Results
//! are merged in registration order, so when two extractors emit the same
//! identifier the one registered first wins regardless of which finished
//! first. An extractor that errors, panics or times out contributes nothing
//! and is reported in [`ExtractionRun::failures`]; the others are unaffected.

use crate::extractor::{default_extractors, ExtractionContext, Extractor};
use crate::unit::ExtractedUnit;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Extractors running at once
    pub concurrency: usize,
    /// Per-extractor wall-clock limit; `None` waits indefinitely
    pub extractor_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map_or(4, |n| n.get()),
            extractor_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractorFailure {
    pub extractor: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractorSummary {
    pub extractor: String,
    /// Units the extractor produced
    pub extracted: usize,
    /// Units that survived identifier dedup
    pub kept: usize,
    pub elapsed_ms: u128,
    pub failed: bool,
}

#[derive(Debug, Default)]
pub struct ExtractionRun {
    pub units: Vec<ExtractedUnit>,
    pub failures: Vec<ExtractorFailure>,
    pub per_extractor: Vec<ExtractorSummary>,
}

impl ExtractionRun {
    pub fn unit(&self, identifier: &str) -> Option<&ExtractedUnit> {
        self.units.iter().find(|u| u.identifier == identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.identifier.as_str())
    }
}

struct Outcome {
    name: &'static str,
    result: Result<Vec<ExtractedUnit>, String>,
    elapsed: Duration,
}

pub struct Orchestrator {
    extractors: Vec<Arc<dyn Extractor>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(extractors: Vec<Arc<dyn Extractor>>, config: OrchestratorConfig) -> Self {
        Self { extractors, config }
    }

    /// Every shipped extractor with default settings
    pub fn with_defaults() -> Self {
        Self::new(default_extractors(), OrchestratorConfig::default())
    }

    pub fn extractor_names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    pub async fn run(&self, ctx: Arc<ExtractionContext>) -> ExtractionRun {
        let timeout = self.config.extractor_timeout;
        tracing::info!(
            "Running {} extractors (concurrency {})",
            self.extractors.len(),
            self.config.concurrency.max(1)
        );

        // `buffered` yields in input order, which is registration order
        let outcomes: Vec<Outcome> = stream::iter(self.extractors.iter().cloned())
            .map(|extractor| {
                let ctx = Arc::clone(&ctx);
                async move {
                    let name = extractor.name();
                    let started = Instant::now();
                    let handle = tokio::task::spawn_blocking(move || extractor.extract_all(&ctx));
                    let result = match timeout {
                        Some(limit) => match tokio::time::timeout(limit, handle).await {
                            Ok(joined) => flatten(joined),
                            // The blocking task cannot be cancelled; its result is discarded
                            Err(_) => Err(format!("timed out after {:?}", limit)),
                        },
                        None => flatten(handle.await),
                    };
                    Outcome {
                        name,
                        result,
                        elapsed: started.elapsed(),
                    }
                }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        merge(outcomes)
    }
}

fn flatten(joined: Result<anyhow::Result<Vec<ExtractedUnit>>, JoinError>) -> Result<Vec<ExtractedUnit>, String> {
    match joined {
        Ok(Ok(units)) => Ok(units),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(e) if e.is_panic() => Err("extractor panicked".to_string()),
        Err(e) => Err(format!("extractor task failed: {}", e)),
    }
}

fn merge(outcomes: Vec<Outcome>) -> ExtractionRun {
    let mut run = ExtractionRun::default();
    let mut seen: HashSet<String> = HashSet::new();

    for outcome in outcomes {
        let elapsed_ms = outcome.elapsed.as_millis();
        match outcome.result {
            Ok(units) => {
                let extracted = units.len();
                let mut kept = 0;
                for unit in units {
                    if seen.insert(unit.identifier.clone()) {
                        run.units.push(unit);
                        kept += 1;
                    } else {
                        tracing::debug!("{}: dropping duplicate {}", outcome.name, unit.identifier);
                    }
                }
                tracing::info!(
                    "{}: {} units ({} kept) in {}ms",
                    outcome.name,
                    extracted,
                    kept,
                    elapsed_ms
                );
                run.per_extractor.push(ExtractorSummary {
                    extractor: outcome.name.to_string(),
                    extracted,
                    kept,
                    elapsed_ms,
                    failed: false,
                });
            }
            Err(message) => {
                tracing::error!("{}: extractor failed: {}", outcome.name, message);
                run.failures.push(ExtractorFailure {
                    extractor: outcome.name.to_string(),
                    message,
                });
                run.per_extractor.push(ExtractorSummary {
                    extractor: outcome.name.to_string(),
                    extracted: 0,
                    kept: 0,
                    elapsed_ms,
                    failed: true,
                });
            }
        }
    }

    tracing::info!(
        "Extraction finished: {} units, {} failed extractors",
        run.units.len(),
        run.failures.len()
    );
    run
}

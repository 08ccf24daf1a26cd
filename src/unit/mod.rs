//! The extracted unit: the normalized record every extractor emits.
//!
//! A unit carries its identifier, optional origin file, an annotated source
//! blob, an open metadata map, a deduplicated dependency list and optional
//! sub-chunks for fine-grained retrieval.

pub mod chunk;

pub use chunk::UnitChunk;

use crate::parser::hash_content;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Relationship labels used in [`Dependency::via`].
pub mod via {
    pub const CODE_REFERENCE: &str = "code_reference";
    pub const ASSOCIATION: &str = "association";
    pub const DELEGATION: &str = "delegation";
    pub const RENDER: &str = "render";
    pub const STATE_MACHINE: &str = "state_machine";
    pub const TEST_COVERAGE: &str = "test_coverage";
    pub const INHERITANCE: &str = "inheritance";
    pub const DECORATION: &str = "decoration";
    pub const ENQUEUE: &str = "enqueue";
    pub const CALLBACK: &str = "callback";
    pub const ROUTE: &str = "route";
    pub const MOUNT: &str = "mount";
    pub const TASK_PREREQUISITE: &str = "task_prerequisite";
    pub const INCLUSION: &str = "inclusion";
}

/// Extractor family that produced a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Model,
    Controller,
    Service,
    Job,
    Mailer,
    Route,
    Middleware,
    Engine,
    Migration,
    StateMachine,
    GraphqlType,
    Factory,
    RakeTask,
    Concern,
    Other,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Model => "model",
            UnitType::Controller => "controller",
            UnitType::Service => "service",
            UnitType::Job => "job",
            UnitType::Mailer => "mailer",
            UnitType::Route => "route",
            UnitType::Middleware => "middleware",
            UnitType::Engine => "engine",
            UnitType::Migration => "migration",
            UnitType::StateMachine => "state_machine",
            UnitType::GraphqlType => "graphql_type",
            UnitType::Factory => "factory",
            UnitType::RakeTask => "rake_task",
            UnitType::Concern => "concern",
            UnitType::Other => "other",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity a dependency points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Model,
    Service,
    Job,
    Mailer,
    Controller,
    Component,
    Route,
    Factory,
    RakeTask,
    GraphqlType,
    Concern,
    Engine,
    Other,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Model => "model",
            DependencyKind::Service => "service",
            DependencyKind::Job => "job",
            DependencyKind::Mailer => "mailer",
            DependencyKind::Controller => "controller",
            DependencyKind::Component => "component",
            DependencyKind::Route => "route",
            DependencyKind::Factory => "factory",
            DependencyKind::RakeTask => "rake_task",
            DependencyKind::GraphqlType => "graphql_type",
            DependencyKind::Concern => "concern",
            DependencyKind::Engine => "engine",
            DependencyKind::Other => "other",
        }
    }
}

/// A `(type, target, via)` triple linking a unit to a named entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "type")]
    pub kind: DependencyKind,
    pub target: String,
    pub via: String,
}

impl Dependency {
    pub fn new(kind: DependencyKind, target: impl Into<String>, via: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            via: via.into(),
        }
    }

    /// The dedup key: `via` is deliberately excluded
    pub fn key(&self) -> (DependencyKind, &str) {
        (self.kind, self.target.as_str())
    }
}

/// One recognized code entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedUnit {
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub source_code: String,
    pub metadata: Map<String, Value>,
    dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    chunks: Vec<UnitChunk>,
}

impl ExtractedUnit {
    pub fn new(unit_type: UnitType, identifier: impl Into<String>, file_path: Option<&Path>) -> Self {
        Self {
            unit_type,
            identifier: identifier.into(),
            namespace: None,
            file_path: file_path.map(Path::to_path_buf),
            source_code: String::new(),
            metadata: Map::new(),
            dependencies: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    /// Set the annotated source and record its line count
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_code = source.into();
        let lines = self.line_count();
        self.metadata.insert("line_count".to_string(), Value::from(lines));
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_metadata(key, value);
        self
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn chunks(&self) -> &[UnitChunk] {
        &self.chunks
    }

    /// Add a dependency unless its `(type, target)` pair is already present.
    /// Returns whether it was added.
    pub fn add_dependency(&mut self, dependency: Dependency) -> bool {
        if self
            .dependencies
            .iter()
            .any(|existing| existing.key() == dependency.key())
        {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    pub fn extend_dependencies<I>(&mut self, dependencies: I)
    where
        I: IntoIterator<Item = Dependency>,
    {
        for dependency in dependencies {
            self.add_dependency(dependency);
        }
    }

    pub fn add_chunk(&mut self, chunk: UnitChunk) {
        self.chunks.push(chunk);
    }

    pub fn line_count(&self) -> usize {
        self.source_code.lines().count()
    }

    /// Rough token estimate used to size retrieval chunks
    pub fn estimated_tokens(&self) -> usize {
        (self.source_code.chars().count() + 3) / 4
    }

    pub fn needs_chunking(&self, line_threshold: usize) -> bool {
        self.line_count() > line_threshold
    }

    /// Content address of the unit's full source
    pub fn source_hash(&self) -> String {
        hash_content(&self.source_code)
    }

    /// True when no two dependencies share a `(type, target)` pair.
    pub fn dependencies_are_unique(&self) -> bool {
        let mut seen = HashSet::new();
        self.dependencies.iter().all(|dep| seen.insert(dep.key()))
    }
}

//! Runtime reflection capability.
//!
//! Some structure is only knowable from a running application: route tables,
//! middleware stacks, engine mounts, loaded class hierarchies and schema
//! types. [`LiveRegistry`] abstracts that source. [`NullRegistry`] is used
//! for purely static runs; [`SnapshotRegistry`] replays a JSON dump taken
//! from a reflective process.

mod snapshot;

pub use snapshot::{RegistrySnapshot, SnapshotRegistry};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// A live class as reported by reflection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveClass {
    pub name: String,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub source_location: Option<PathBuf>,
    #[serde(default)]
    pub ancestors: Vec<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// One entry of the routing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub verb: String,
    pub path: String,
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub constraints: Map<String, Value>,
}

impl RouteEntry {
    /// `"VERB /path"`, the route's unit identifier
    pub fn identifier(&self) -> String {
        let verb = if self.verb.is_empty() { "ANY" } else { self.verb.as_str() };
        format!("{} {}", verb.to_uppercase(), self.path)
    }
}

/// One layer of the middleware stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareEntry {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A mounted engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub source_location: Option<PathBuf>,
}

/// A field on a typed-API schema type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub resolver: Option<String>,
}

/// A typed-API schema type (object, input, enum, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaType {
    pub name: String,
    pub kind: String,
    /// Name exposed in the schema when it differs from the class name
    #[serde(default)]
    pub graphql_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    #[serde(default)]
    pub source_location: Option<PathBuf>,
}

/// Any object a reflective registry can hand to an extractor
#[derive(Debug, Clone, PartialEq)]
pub enum LiveObject {
    Class(LiveClass),
    Route(RouteEntry),
    Middleware(Vec<MiddlewareEntry>),
    Engine(EngineMount),
    SchemaType(SchemaType),
}

impl LiveObject {
    /// Human-readable label for logs
    pub fn label(&self) -> String {
        match self {
            LiveObject::Class(class) => class.name.clone(),
            LiveObject::Route(route) => route.identifier(),
            LiveObject::Middleware(stack) => format!("middleware stack ({} entries)", stack.len()),
            LiveObject::Engine(engine) => engine.name.clone(),
            LiveObject::SchemaType(schema_type) => schema_type.name.clone(),
        }
    }
}

/// Capability interface over a live object model
pub trait LiveRegistry: Send + Sync {
    /// Whether reflection is possible at all in this run
    fn is_available(&self) -> bool;

    /// Direct and indirect subclasses of `base`
    fn subclasses_of(&self, base: &str) -> Vec<LiveClass>;

    fn all_routes(&self) -> Vec<RouteEntry>;

    fn middleware_entries(&self) -> Vec<MiddlewareEntry>;

    fn engine_mounts(&self) -> Vec<EngineMount>;

    fn schema_types(&self) -> Vec<SchemaType>;
}

/// Registry for static runs: reflection unavailable, every query empty
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRegistry;

impl LiveRegistry for NullRegistry {
    fn is_available(&self) -> bool {
        false
    }

    fn subclasses_of(&self, _base: &str) -> Vec<LiveClass> {
        Vec::new()
    }

    fn all_routes(&self) -> Vec<RouteEntry> {
        Vec::new()
    }

    fn middleware_entries(&self) -> Vec<MiddlewareEntry> {
        Vec::new()
    }

    fn engine_mounts(&self) -> Vec<EngineMount> {
        Vec::new()
    }

    fn schema_types(&self) -> Vec<SchemaType> {
        Vec::new()
    }
}

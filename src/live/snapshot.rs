use super::{EngineMount, LiveClass, LiveRegistry, MiddlewareEntry, RouteEntry, SchemaType};
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::fs;

/// Serialized dump of a live object model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub classes: Vec<LiveClass>,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
    #[serde(default)]
    pub middleware: Vec<MiddlewareEntry>,
    #[serde(default)]
    pub engines: Vec<EngineMount>,
    #[serde(default)]
    pub schema_types: Vec<SchemaType>,
}

/// Registry replaying a [`RegistrySnapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotRegistry {
    snapshot: RegistrySnapshot,
    superclass_of: HashMap<String, String>,
}

impl SnapshotRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        let superclass_of = snapshot
            .classes
            .iter()
            .filter_map(|c| c.superclass.clone().map(|sc| (c.name.clone(), sc)))
            .collect();
        Self {
            snapshot,
            superclass_of,
        }
    }

    pub async fn load(path: &Path) -> Result<Self, RegistryError> {
        let data = fs::read_to_string(path)
            .await
            .map_err(|source| RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let snapshot = serde_json::from_str(&data).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(snapshot))
    }

    fn inherits_from(&self, class: &LiveClass, base: &str) -> bool {
        if class.ancestors.iter().any(|a| a == base) {
            return true;
        }
        let mut seen = HashSet::new();
        let mut current = class.superclass.as_deref();
        while let Some(name) = current {
            if name == base {
                return true;
            }
            if !seen.insert(name) {
                break;
            }
            current = self.superclass_of.get(name).map(String::as_str);
        }
        false
    }
}

impl LiveRegistry for SnapshotRegistry {
    fn is_available(&self) -> bool {
        true
    }

    fn subclasses_of(&self, base: &str) -> Vec<LiveClass> {
        self.snapshot
            .classes
            .iter()
            .filter(|c| c.name != base && self.inherits_from(c, base))
            .cloned()
            .collect()
    }

    fn all_routes(&self) -> Vec<RouteEntry> {
        self.snapshot.routes.clone()
    }

    fn middleware_entries(&self) -> Vec<MiddlewareEntry> {
        self.snapshot.middleware.clone()
    }

    fn engine_mounts(&self) -> Vec<EngineMount> {
        self.snapshot.engines.clone()
    }

    fn schema_types(&self) -> Vec<SchemaType> {
        self.snapshot.schema_types.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SnapshotRegistry {
        let snapshot: RegistrySnapshot = serde_json::from_value(json!({
            "classes": [
                {"name": "ApplicationRecord", "superclass": "ActiveRecord::Base"},
                {"name": "User", "superclass": "ApplicationRecord"},
                {"name": "Admin", "superclass": "User"},
                {"name": "Legacy", "ancestors": ["ActiveRecord::Base"]},
                {"name": "Loop", "superclass": "Loop"}
            ],
            "routes": [{"verb": "GET", "path": "/users"}]
        }))
        .unwrap();
        SnapshotRegistry::new(snapshot)
    }

    #[test]
    fn test_subclasses_are_transitive() {
        let names: Vec<String> = registry()
            .subclasses_of("ActiveRecord::Base")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["ApplicationRecord", "User", "Admin", "Legacy"]);
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let registry = registry();
        assert!(registry.is_available());
        assert_eq!(registry.all_routes().len(), 1);
        assert!(registry.middleware_entries().is_empty());
        assert!(registry.engine_mounts().is_empty());
    }

    #[tokio::test]
    async fn test_load_reports_invalid_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = SnapshotRegistry::load(&path).await.unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }
}

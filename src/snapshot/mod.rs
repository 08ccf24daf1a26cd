use crate::error::ManifestError;
use crate::unit::ExtractedUnit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Content addresses of one unit and its chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFingerprint {
    pub source_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl UnitFingerprint {
    pub fn of(unit: &ExtractedUnit) -> Self {
        Self {
            source_hash: unit.source_hash(),
            chunk_hashes: unit.chunks().iter().map(|c| c.content_hash.clone()).collect(),
            file_path: unit.file_path.clone(),
        }
    }
}

/// Record of one indexing run, used to tell what changed in the next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub run_id: Uuid,
    /// Seconds since the Unix epoch
    pub generated_at: u64,
    pub units: BTreeMap<String, UnitFingerprint>,
}

impl IndexManifest {
    pub fn from_units(units: &[ExtractedUnit]) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            units: units
                .iter()
                .map(|u| (u.identifier.clone(), UnitFingerprint::of(u)))
                .collect(),
        }
    }

    /// Compare against an earlier run. Chunk hashes count as content, so a
    /// unit whose source is unchanged but whose chunking differs is modified.
    pub fn diff(&self, previous: &IndexManifest) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (id, fingerprint) in &self.units {
            match previous.units.get(id) {
                None => changes.added.push(id.clone()),
                Some(old) if old.source_hash != fingerprint.source_hash || old.chunk_hashes != fingerprint.chunk_hashes => {
                    changes.modified.push(id.clone())
                }
                Some(_) => changes.unchanged.push(id.clone()),
            }
        }
        changes.removed = previous
            .units
            .keys()
            .filter(|id| !self.units.contains_key(*id))
            .cloned()
            .collect();
        changes
    }

    /// Every unit counts as added
    pub fn initial_changes(&self) -> ChangeSet {
        ChangeSet {
            added: self.units.keys().cloned().collect(),
            ..ChangeSet::default()
        }
    }

    /// Files of added, modified and removed units, for impact analysis
    pub fn changed_files(&self, previous: Option<&IndexManifest>, changes: &ChangeSet) -> Vec<PathBuf> {
        let current = changes
            .added
            .iter()
            .chain(&changes.modified)
            .filter_map(|id| self.units.get(id));
        let gone = changes
            .removed
            .iter()
            .filter_map(|id| previous.and_then(|p| p.units.get(id)));
        let mut files: Vec<PathBuf> = current.chain(gone).filter_map(|f| f.file_path.clone()).collect();
        files.sort();
        files.dedup();
        files
    }
}

/// Identifiers grouped by how they changed between two runs, each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }
}

/// Loads and saves the manifest of the previous run
pub struct ManifestStore {
    manifest_path: PathBuf,
}

impl ManifestStore {
    pub fn new(manifest_path: PathBuf) -> Self {
        Self { manifest_path }
    }

    /// Store for `manifest.json` inside an output directory
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(MANIFEST_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.manifest_path
    }

    /// `None` when no earlier run left a manifest
    pub async fn load(&self) -> Result<Option<IndexManifest>, ManifestError> {
        if !fs::try_exists(&self.manifest_path).await? {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.manifest_path).await?;
        let manifest = serde_json::from_str(&data)?;
        tracing::debug!("Loaded manifest from {}", self.manifest_path.display());
        Ok(Some(manifest))
    }

    pub async fn save(&self, manifest: &IndexManifest) -> Result<(), ManifestError> {
        let data = serde_json::to_string_pretty(manifest)?;

        if let Some(parent) = self.manifest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&self.manifest_path, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{UnitChunk, UnitType};
    use serde_json::Map;
    use tempfile::TempDir;

    fn unit(id: &str, file: &str, source: &str) -> ExtractedUnit {
        ExtractedUnit::new(UnitType::Model, id, Some(Path::new(file))).with_source(source)
    }

    #[test]
    fn test_diff_classifies_units() {
        let before = IndexManifest::from_units(&[
            unit("Order", "app/models/order.rb", "class Order\nend\n"),
            unit("User", "app/models/user.rb", "class User\nend\n"),
            unit("Legacy", "app/models/legacy.rb", "class Legacy\nend\n"),
        ]);
        let after = IndexManifest::from_units(&[
            unit("Order", "app/models/order.rb", "class Order\nend\n"),
            unit("User", "app/models/user.rb", "class User\n  has_many :orders\nend\n"),
            unit("Cart", "app/models/cart.rb", "class Cart\nend\n"),
        ]);

        let changes = after.diff(&before);
        assert_eq!(changes.added, vec!["Cart"]);
        assert_eq!(changes.modified, vec!["User"]);
        assert_eq!(changes.removed, vec!["Legacy"]);
        assert_eq!(changes.unchanged, vec!["Order"]);
        assert!(changes.has_changes());
        assert_ne!(after.run_id, before.run_id);

        assert_eq!(
            after.changed_files(Some(&before), &changes),
            vec![
                PathBuf::from("app/models/cart.rb"),
                PathBuf::from("app/models/legacy.rb"),
                PathBuf::from("app/models/user.rb"),
            ]
        );
    }

    #[test]
    fn test_chunk_change_is_a_modification() {
        let plain = unit("Order", "app/models/order.rb", "class Order\nend\n");
        let mut chunked = plain.clone();
        chunked.add_chunk(UnitChunk::new("summary", "Order#summary", "class Order\n", Map::new()));

        let changes = IndexManifest::from_units(&[chunked]).diff(&IndexManifest::from_units(&[plain]));
        assert_eq!(changes.modified, vec!["Order"]);
        assert!(!IndexManifest::from_units(&[]).diff(&IndexManifest::from_units(&[])).has_changes());
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::in_dir(&dir.path().join("out"));
        assert!(store.load().await.unwrap().is_none());

        let manifest = IndexManifest::from_units(&[unit("Order", "app/models/order.rb", "class Order\nend\n")]);
        store.save(&manifest).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, Some(manifest));
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::in_dir(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load().await, Err(ManifestError::Parse(_))));
    }
}

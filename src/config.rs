use crate::analysis::{DEFAULT_HUB_LIMIT, DEFAULT_MAX_CYCLES};
use crate::extractor::DEFAULT_CHUNK_THRESHOLD;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_ROOT: &str = "CODEBASE_INDEX_ROOT";
pub const ENV_OUTPUT: &str = "CODEBASE_INDEX_OUTPUT";
pub const ENV_MAX_FILES: &str = "CODEBASE_INDEX_MAX_FILES";
pub const ENV_CONCURRENCY: &str = "CODEBASE_INDEX_CONCURRENCY";
pub const ENV_EXTRACTOR_TIMEOUT: &str = "CODEBASE_INDEX_EXTRACTOR_TIMEOUT_SECS";
pub const ENV_HUB_LIMIT: &str = "CODEBASE_INDEX_HUB_LIMIT";
pub const ENV_MAX_CYCLES: &str = "CODEBASE_INDEX_MAX_CYCLES";
pub const ENV_REGISTRY_SNAPSHOT: &str = "CODEBASE_INDEX_REGISTRY_SNAPSHOT";
pub const ENV_CHUNK_THRESHOLD: &str = "CODEBASE_INDEX_CHUNK_THRESHOLD";

/// Settings for one indexing run
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerConfig {
    pub root: PathBuf,
    /// Defaults to `<root>/tmp/codebase_index`
    pub output_dir: Option<PathBuf>,
    pub max_files: Option<usize>,
    /// Defaults to the number of extractors
    pub concurrency: Option<usize>,
    pub extractor_timeout: Option<Duration>,
    pub hub_limit: usize,
    pub max_cycles: usize,
    pub registry_snapshot: Option<PathBuf>,
    pub chunk_threshold: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            output_dir: None,
            max_files: None,
            concurrency: None,
            extractor_timeout: None,
            hub_limit: DEFAULT_HUB_LIMIT,
            max_cycles: DEFAULT_MAX_CYCLES,
            registry_snapshot: None,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

impl IndexerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Read `CODEBASE_INDEX_*` variables; unset ones keep their defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(root) = var(ENV_ROOT) {
            config.root = PathBuf::from(root);
        }
        config.output_dir = var(ENV_OUTPUT).map(PathBuf::from);
        config.max_files = parse(ENV_MAX_FILES, var(ENV_MAX_FILES))?;
        config.concurrency = parse::<usize>(ENV_CONCURRENCY, var(ENV_CONCURRENCY))?.map(|n| n.max(1));
        config.extractor_timeout = parse::<u64>(ENV_EXTRACTOR_TIMEOUT, var(ENV_EXTRACTOR_TIMEOUT))?.map(Duration::from_secs);
        if let Some(limit) = parse(ENV_HUB_LIMIT, var(ENV_HUB_LIMIT))? {
            config.hub_limit = limit;
        }
        if let Some(max) = parse(ENV_MAX_CYCLES, var(ENV_MAX_CYCLES))? {
            config.max_cycles = max;
        }
        config.registry_snapshot = var(ENV_REGISTRY_SNAPSHOT).map(PathBuf::from);
        if let Some(lines) = parse(ENV_CHUNK_THRESHOLD, var(ENV_CHUNK_THRESHOLD))? {
            config.chunk_threshold = lines;
        }

        Ok(config)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.root.join("tmp").join("codebase_index"))
    }
}

fn parse<T>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| v.parse::<T>().with_context(|| format!("Invalid value for {}: '{}'", key, v)))
        .transpose()
}

/// Directory name under the user config home
pub const CONFIG_DIR_NAME: &str = "codebase-index";

/// Load the first `.env` found: the working directory's, then
/// `$XDG_CONFIG_HOME/codebase-index/.env` (or `~/.config/...`). Variables
/// already set in the shell are never overridden.
pub fn load_env_files() -> Option<PathBuf> {
    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    let loaded = env_file_candidates(std::env::current_dir().ok(), config_home)
        .into_iter()
        .find(|path| path.is_file() && dotenv::from_path(path).is_ok());

    match &loaded {
        Some(path) => tracing::debug!("Loaded .env from: {}", path.display()),
        None => tracing::debug!("No .env file found, using environment variables only"),
    }
    loaded
}

fn env_file_candidates(cwd: Option<PathBuf>, config_home: Option<PathBuf>) -> Vec<PathBuf> {
    cwd.map(|dir| dir.join(".env"))
        .into_iter()
        .chain(config_home.map(|dir| dir.join(CONFIG_DIR_NAME).join(".env")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<IndexerConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        IndexerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, IndexerConfig::default());
        assert_eq!(config.output_dir(), PathBuf::from("./tmp/codebase_index"));
        assert_eq!(config.hub_limit, 10);
        assert_eq!(config.max_cycles, 100);
        assert_eq!(config.chunk_threshold, 200);
    }

    #[test]
    fn test_reads_every_setting() {
        let config = config_from(&[
            (ENV_ROOT, "/srv/shop"),
            (ENV_OUTPUT, "/tmp/out"),
            (ENV_MAX_FILES, "5000"),
            (ENV_CONCURRENCY, "0"),
            (ENV_EXTRACTOR_TIMEOUT, "30"),
            (ENV_HUB_LIMIT, "5"),
            (ENV_MAX_CYCLES, "20"),
            (ENV_REGISTRY_SNAPSHOT, "/tmp/registry.json"),
            (ENV_CHUNK_THRESHOLD, " 80 "),
        ])
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/srv/shop"));
        assert_eq!(config.output_dir(), PathBuf::from("/tmp/out"));
        assert_eq!(config.max_files, Some(5000));
        assert_eq!(config.concurrency, Some(1));
        assert_eq!(config.extractor_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.hub_limit, 5);
        assert_eq!(config.max_cycles, 20);
        assert_eq!(config.registry_snapshot, Some(PathBuf::from("/tmp/registry.json")));
        assert_eq!(config.chunk_threshold, 80);
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let err = config_from(&[(ENV_HUB_LIMIT, "many")]).unwrap_err();
        assert!(err.to_string().contains(ENV_HUB_LIMIT));
    }

    #[test]
    fn test_env_file_lookup_order() {
        let candidates = env_file_candidates(Some(PathBuf::from("/work/shop")), Some(PathBuf::from("/home/dev/.config")));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/work/shop/.env"),
                PathBuf::from("/home/dev/.config/codebase-index/.env"),
            ]
        );
        assert!(env_file_candidates(None, None).is_empty());
    }

    #[test]
    fn test_loads_project_env_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "CODEBASE_INDEX_TEST_ONLY_KEY=from_file\n").unwrap();
        let path = env_file_candidates(Some(dir.path().to_path_buf()), None)
            .into_iter()
            .find(|p| p.is_file())
            .unwrap();
        dotenv::from_path(&path).unwrap();
        assert_eq!(std::env::var("CODEBASE_INDEX_TEST_ONLY_KEY").unwrap(), "from_file");
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config_from(&[(ENV_OUTPUT, "  "), (ENV_MAX_FILES, "")]).unwrap();
        assert_eq!(config.output_dir, None);
        assert_eq!(config.max_files, None);
    }
}

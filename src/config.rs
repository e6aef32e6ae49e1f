use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::semantic::DEFAULT_MODEL;

const CONFIG_FILE: &str = "config.yaml";

/// Default number of recommendations
const DEFAULT_K: usize = 5;
/// Descriptions encoded per batch during a build
const DEFAULT_BATCH_SIZE: usize = 32;
/// Default limit on downloading and loading the model, in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Longer texts are truncated before encoding
const DEFAULT_MAX_INPUT_CHARS: usize = 2000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Number of recommendations when none is requested
    #[serde(default = "default_k")]
    pub default_k: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Parallelism for embedding generation: "auto" or a positive integer
    #[serde(default = "default_embedding_parallelism")]
    pub embedding_parallelism: String,

    /// Seconds allowed for downloading and loading the model
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Index file, relative to the base path
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Metadata file, relative to the base path
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,

    /// Record searches, moods and surprise picks for `stats`
    #[serde(default = "default_track_interactions")]
    pub track_interactions: bool,

    /// Interaction log, relative to the base path
    #[serde(default = "default_interactions_file")]
    pub interactions_file: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            default_k: DEFAULT_K,
            batch_size: DEFAULT_BATCH_SIZE,
            embedding_parallelism: default_embedding_parallelism(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            index_file: default_index_file(),
            metadata_file: default_metadata_file(),
            track_interactions: default_track_interactions(),
            interactions_file: default_interactions_file(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_embedding_parallelism() -> String {
    "auto".to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

fn default_index_file() -> String {
    "vectors.bin".to_string()
}

fn default_metadata_file() -> String {
    "books_metadata.csv".to_string()
}

fn default_track_interactions() -> bool {
    true
}

fn default_interactions_file() -> String {
    "interactions.json".to_string()
}

/// `SHELFMATCH_BASE_PATH`, or `~/.local/share/shelfmatch`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("SHELFMATCH_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("couldnt find home dir")?
        .ok_or_else(|| anyhow!("home dir is not set"))?;
    Ok(home.join(".local/share/shelfmatch"))
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }

        if self.default_k == 0 {
            bail!("default_k must be at least 1");
        }

        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }

        // "auto" or positive integer
        if self.embedding_parallelism != "auto" {
            match self.embedding_parallelism.parse::<usize>() {
                Ok(0) | Err(_) => bail!(
                    "embedding_parallelism must be 'auto' or a positive integer, got '{}'",
                    self.embedding_parallelism
                ),
                Ok(_) => {}
            }
        }

        if self.download_timeout_secs == 0 {
            bail!("download_timeout_secs must be greater than 0");
        }

        if self.max_input_chars == 0 {
            bail!("max_input_chars must be at least 1");
        }

        Ok(())
    }

    /// Worker threads for embedding, `None` meaning one per core.
    pub fn parallelism(&self) -> Option<usize> {
        self.embedding_parallelism.parse::<usize>().ok()
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&base_path()?)
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if it
    /// does not exist yet.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("couldnt create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            let config = Self {
                base_path: base_path.to_path_buf(),
                ..Self::default()
            };
            config.save()?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("couldnt read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", config_path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            log::debug!("rewriting {} with new defaults", config_path.display());
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = self.base_path.join(CONFIG_FILE);
        let temp_path = self.base_path.join(format!("{CONFIG_FILE}-tmp"));

        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&temp_path, config_str.as_bytes())?;
        std::fs::rename(&temp_path, &config_path)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn index_path(&self) -> PathBuf {
        self.base_path.join(&self.index_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.base_path.join(&self.metadata_file)
    }

    pub fn interactions_path(&self) -> PathBuf {
        self.base_path.join(&self.interactions_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.default_k, 5);
        assert_eq!(config.parallelism(), None);
        assert_eq!(config.index_path(), tmp.path().join("vectors.bin"));
        assert_eq!(config.metadata_path(), tmp.path().join("books_metadata.csv"));
        assert!(config.track_interactions);
        assert_eq!(
            config.interactions_path(),
            tmp.path().join("interactions.json")
        );
    }

    #[test]
    fn fills_missing_fields_and_resaves() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "default_k: 7\n").unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.default_k, 7);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);

        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("batch_size"));
    }

    #[test]
    fn explicit_parallelism() {
        let config = Config {
            embedding_parallelism: "3".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.parallelism(), Some(3));
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            Config {
                default_k: 0,
                ..Config::default()
            },
            Config {
                batch_size: 0,
                ..Config::default()
            },
            Config {
                embedding_parallelism: "0".to_string(),
                ..Config::default()
            },
            Config {
                embedding_parallelism: "lots".to_string(),
                ..Config::default()
            },
            Config {
                download_timeout_secs: 0,
                ..Config::default()
            },
            Config {
                max_input_chars: 0,
                ..Config::default()
            },
        ];

        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "default_k: [oops\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }
}

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use eyre::WrapErr;
use serde::Deserialize;

use crate::{
    fs::OsFs,
    network::{Pool, PoolConfig},
    storage::{DeletePolicy, FileStore, Memory, RedisStore, SharedStore},
};

pub const DEFAULT_FILENAME: &str = "store.json";

/// Which backend to open and how.
///
/// ```json
/// { "backend": "file", "dir": "/var/lib/app", "save_on_change": true }
/// ```
#[derive(Debug, Clone, Deserialize, strum::Display)]
#[serde(tag = "backend", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Config {
    Memory {
        #[serde(default)]
        delete_policy: Option<DeletePolicy>,
    },
    File(FileConfig),
    Redis(RedisConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub dir: Option<PathBuf>,
    pub filename: Option<String>,
    #[serde(default)]
    pub save_on_change: bool,
    pub delete_policy: Option<DeletePolicy>,
}

impl FileConfig {
    pub fn root(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn filename(&self) -> &str {
        self.filename.as_deref().unwrap_or(DEFAULT_FILENAME)
    }

    pub fn db_file(&self) -> PathBuf {
        match (&self.dir, &self.filename) {
            (None, Some(f)) => Path::new(".").join(f),
            (Some(p), Some(f)) => p.join(f),
            (Some(p), None) => p.join(DEFAULT_FILENAME),
            (None, None) => Path::new(".").join(DEFAULT_FILENAME),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub addr: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub pool: PoolConfig,
    pub delete_policy: Option<DeletePolicy>,
}

impl Config {
    pub fn from_json(input: &str) -> eyre::Result<Self> {
        serde_json::from_str(input).wrap_err("Invalid store config")
    }

    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Couldn't read config {}", path.display()))?;
        Self::from_json(&input)
    }
}

/// Opens the backend described by `config`.
pub async fn open_store(config: &Config) -> eyre::Result<SharedStore> {
    tracing::info!(backend = %config, "Opening store");

    Ok(match config {
        Config::Memory { delete_policy } => {
            let mut store = Memory::new();
            if let Some(policy) = delete_policy {
                store = store.with_delete_policy(*policy);
            }
            Arc::new(store)
        }

        Config::File(file) => {
            let mut store = FileStore::open(
                OsFs::new(file.root()),
                file.filename(),
                file.save_on_change,
            )
            .wrap_err_with(|| format!("Couldn't open {}", file.db_file().display()))?;
            if let Some(policy) = file.delete_policy {
                store = store.with_delete_policy(policy);
            }
            Arc::new(store)
        }

        Config::Redis(redis) => {
            let pool = Arc::new(Pool::new(redis.addr.clone(), redis.pool.clone()));
            let mut store = RedisStore::new(pool, &redis.prefix)
                .await
                .wrap_err_with(|| format!("Couldn't connect to redis at {}", redis.addr))?;
            if let Some(policy) = redis.delete_policy {
                store = store.with_delete_policy(policy);
            }
            Arc::new(store)
        }
    })
}

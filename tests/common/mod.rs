use std::path::Path;

use kvstore::{config::FileConfig, open_store, Config, SharedStore};
#[cfg(feature = "testing")]
use kvstore::{config::RedisConfig, network::PoolConfig};

pub fn logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kvstore=debug")
        .with_test_writer()
        .try_init();
}

pub async fn memory_store() -> SharedStore {
    open_store(&Config::Memory {
        delete_policy: None,
    })
    .await
    .unwrap()
}

pub async fn file_store(dir: &Path, save_on_change: bool) -> SharedStore {
    open_store(&Config::File(FileConfig {
        dir: Some(dir.to_owned()),
        filename: Some("store.json".into()),
        save_on_change,
        delete_policy: None,
    }))
    .await
    .unwrap()
}

#[cfg(feature = "testing")]
pub async fn redis_store(addr: &str, prefix: &str) -> SharedStore {
    open_store(&Config::Redis(RedisConfig {
        addr: addr.to_owned(),
        prefix: prefix.to_owned(),
        pool: PoolConfig::default(),
        delete_policy: None,
    }))
    .await
    .unwrap()
}

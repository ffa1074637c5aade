//! String key-value store behind one async contract, with three backends:
//! an in-process map, a JSON file and a Redis server.

pub mod config;
pub mod encoding;
pub mod error;
pub mod fs;
pub mod network;
pub mod storage;

pub use crate::{
    config::{open_store, Config},
    error::StoreError,
    storage::{
        DeletePolicy, FileStore, Memory, PersistentStore, RedisStore, SharedStore, Store,
    },
};

use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{DeletePolicy, Store};
use crate::{
    encoding::resp2::{Command, Reply},
    error::StoreError,
    network::{Pool, PoolConfig, PooledConnection},
};

const SEPARATOR: &str = "--";

/// Store living in a Redis server, namespaced by a key prefix.
///
/// Nothing is cached locally; every operation is a round-trip on a pooled
/// connection. Logical key `k` is stored as `prefix--k`, or as `k` when the
/// prefix is empty.
#[derive(Debug)]
pub struct RedisStore {
    pool: Arc<Pool>,
    prefix: String,
    delete_policy: DeletePolicy,
    // Orders writers against readers on this instance. The pool itself does
    // not need it.
    ordering: RwLock<()>,
}

impl RedisStore {
    /// Wraps `pool`, checking with a PING that the server answers.
    #[instrument(skip(pool), fields(addr = %pool.addr()), err)]
    pub async fn new(pool: Arc<Pool>, prefix: &str) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            prefix: prefix.to_owned(),
            delete_policy: DeletePolicy::Lenient,
            ordering: RwLock::new(()),
        };
        store.is_valid_connection().await?;
        tracing::info!(prefix = %store.prefix, "Connected to redis");

        Ok(store)
    }

    /// Builds a pool with default settings for `addr` and wraps it.
    pub async fn connect(addr: &str, prefix: &str) -> Result<Self, StoreError> {
        Self::new(Arc::new(Pool::new(addr, PoolConfig::default())), prefix).await
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Sends PING and expects the canonical PONG back.
    pub async fn is_valid_connection(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| {
            tracing::error!(error = ?e, "Couldn't reach redis");
            StoreError::DataSourceDoesNotExist {
                name: self.pool.addr().to_owned(),
            }
        })?;

        match self.request(&mut conn, Command::new("PING"), "").await? {
            Reply::Simple(s) if s == "PONG" => Ok(()),
            reply => Err(StoreError::UnexpectedReply { op: "PING", reply }),
        }
    }

    pub fn derive_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{}{SEPARATOR}{key}", self.prefix)
        }
    }

    fn logical_key<'a>(&self, derived: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(derived);
        }
        derived
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(SEPARATOR)
    }

    /// KEYS pattern matching this store's namespace. The prefix is escaped so
    /// it only matches itself.
    fn pattern(&self) -> String {
        if self.prefix.is_empty() {
            return "*".to_owned();
        }

        let mut pattern = String::with_capacity(self.prefix.len() + SEPARATOR.len() + 1);
        for c in self.prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(SEPARATOR);
        pattern.push('*');
        pattern
    }

    /// Raw keys as stored in redis, prefix included.
    pub async fn derived_keys(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.ordering.read().await;
        let mut conn = self.borrow("KEYS", "*").await?;
        self.scan(&mut conn).await
    }

    async fn borrow(
        &self,
        op: &'static str,
        key: &str,
    ) -> Result<PooledConnection<'_>, StoreError> {
        self.pool.get().await.map_err(|source| StoreError::Transport {
            op,
            key: key.to_owned(),
            source,
        })
    }

    async fn request(
        &self,
        conn: &mut PooledConnection<'_>,
        command: Command,
        key: &str,
    ) -> Result<Reply, StoreError> {
        let op = command.name();
        match conn.request(&command).await {
            Ok(Reply::Error(message)) => Err(StoreError::ServerError { op, message }),
            Ok(reply) => Ok(reply),
            Err(source) => Err(StoreError::Transport {
                op,
                key: key.to_owned(),
                source,
            }),
        }
    }

    async fn fetch(
        &self,
        conn: &mut PooledConnection<'_>,
        derived: &str,
    ) -> Result<Option<String>, StoreError> {
        match self.request(conn, Command::new("GET").arg(derived), derived).await? {
            Reply::Bulk(None) => Ok(None),
            reply @ Reply::Bulk(Some(_)) => Ok(reply.into_text()?),
            reply => Err(StoreError::UnexpectedReply { op: "GET", reply }),
        }
    }

    #[instrument(skip(self, conn), fields(prefix = %self.prefix), err)]
    async fn scan(&self, conn: &mut PooledConnection<'_>) -> Result<Vec<String>, StoreError> {
        let pattern = self.pattern();
        match self.request(conn, Command::new("KEYS").arg(&pattern), &pattern).await? {
            Reply::Array(None) => Ok(vec![]),
            Reply::Array(Some(items)) => items
                .into_iter()
                .map(|item| -> Result<String, StoreError> {
                    match item.clone().into_text()? {
                        Some(key) => Ok(key),
                        None => Err(StoreError::UnexpectedReply {
                            op: "KEYS",
                            reply: item,
                        }),
                    }
                })
                .collect(),
            reply => Err(StoreError::UnexpectedReply { op: "KEYS", reply }),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.ordering.read().await;
        let derived = self.derive_key(key);
        let mut conn = self.borrow("GET", &derived).await?;

        let value = self.fetch(&mut conn, &derived).await?;
        tracing::debug!(key = %derived, found = value.is_some(), "GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.ordering.write().await;
        let derived = self.derive_key(key);
        let mut conn = self.borrow("SET", &derived).await?;

        let command = Command::new("SET").arg(&derived).arg(value);
        match self.request(&mut conn, command, &derived).await? {
            Reply::Simple(s) if s == "OK" => {
                tracing::debug!(key = %derived, "SET");
                Ok(())
            }
            reply => Err(StoreError::UnexpectedReply { op: "SET", reply }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.ordering.write().await;
        let derived = self.derive_key(key);
        let mut conn = self.borrow("DEL", &derived).await?;

        match self.request(&mut conn, Command::new("DEL").arg(&derived), &derived).await? {
            Reply::Integer(0) => self.delete_policy.absent(key),
            Reply::Integer(_) => {
                tracing::debug!(key = %derived, "DEL");
                Ok(())
            }
            reply => Err(StoreError::UnexpectedReply { op: "DEL", reply }),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.ordering.read().await;
        let mut conn = self.borrow("KEYS", "*").await?;

        let keys = self
            .scan(&mut conn)
            .await?
            .iter()
            .filter_map(|derived| self.logical_key(derived))
            .map(str::to_owned)
            .collect_vec();
        Ok(keys)
    }

    /// Scans the keys, then fetches each one. Keys deleted in between are
    /// skipped, so this can come back shorter than a `keys()` taken just
    /// before.
    async fn values(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.ordering.read().await;
        let mut conn = self.borrow("KEYS", "*").await?;

        let keys = self.scan(&mut conn).await?;
        let mut values = Vec::with_capacity(keys.len());
        for derived in &keys {
            match self.fetch(&mut conn, derived).await? {
                Some(value) => values.push(value),
                None => tracing::debug!(key = %derived, "Key vanished before fetch"),
            }
        }

        Ok(values)
    }

    fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::network::testing::{unused_addr, FakeRedis};

    async fn store(server: &FakeRedis, prefix: &str) -> RedisStore {
        RedisStore::connect(server.addr(), prefix).await.unwrap()
    }

    fn seed(
        server: &FakeRedis,
        store: &RedisStore,
        count: usize,
    ) -> (Vec<String>, Vec<String>) {
        (0..count)
            .map(|i| {
                let key = format!("randomkey-{i}");
                let value = format!("value-{}", i * 7919);
                server.set(&store.derive_key(&key), &value);
                (key, value)
            })
            .unzip()
    }

    #[tokio::test]
    async fn new_checks_the_connection() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "testprefix").await;

        assert_eq!(store.prefix(), "testprefix");
        store.is_valid_connection().await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_ping_reply_fails_construction() {
        let server = FakeRedis::start().await.unwrap();
        server.set_ping_reply("PANG");

        let err = RedisStore::connect(server.addr(), "p").await.unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedReply { op: "PING", .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_missing_data_source() {
        let addr = unused_addr().await.unwrap();

        let err = RedisStore::connect(&addr, "p").await.unwrap_err();
        assert!(err.is_data_source_does_not_exist());
    }

    #[tokio::test]
    async fn keys_are_namespaced() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "p").await;

        store.set("k", "v").await.unwrap();

        assert_eq!(server.get("p--k").as_deref(), Some("v"));
        assert!(!server.exists("k"));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn empty_prefix_uses_keys_as_is() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "").await;

        store.set("plain", "v").await.unwrap();
        assert_eq!(server.get("plain").as_deref(), Some("v"));
        assert_eq!(store.keys().await.unwrap(), vec!["plain"]);
    }

    #[tokio::test]
    async fn get_reads_seeded_keys() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "testprefix").await;
        server.set(&store.derive_key("test1"), "testkey");
        server.set(&store.derive_key("test2"), "testkey2");

        assert_eq!(store.get("test1").await.unwrap().as_deref(), Some("testkey"));
        assert_eq!(store.get("nonexistentkey").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_reports_server_errors() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "p").await;
        server.set("p--k", "v");

        server.fail_next("WRONGTYPE Operation against a key holding the wrong kind of value");
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::ServerError { op: "GET", .. }));

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn get_reports_transport_errors() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "p").await;

        server.hang_up_next();
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Transport { op: "GET", .. }));
    }

    #[tokio::test]
    async fn set_reports_rejection() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "p").await;

        server.fail_next("OOM command not allowed");
        assert!(store.set("k", "v").await.is_err());
        assert!(!server.exists("p--k"));
    }

    #[tokio::test]
    async fn delete_only_touches_the_exact_key() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "testprefix").await;
        let derived = store.derive_key("testkey1");
        server.set(&derived, "someothertest");
        server.set(&format!("{derived}123"), "someothertest123");

        store.delete("testkey1").await.unwrap();

        assert!(!server.exists(&derived));
        assert!(server.exists(&format!("{derived}123")));
    }

    #[tokio::test]
    async fn delete_follows_policy_for_absent_keys() {
        let server = FakeRedis::start().await.unwrap();
        let lenient = store(&server, "p").await;
        lenient.delete("missing").await.unwrap();

        let strict = store(&server, "p")
            .await
            .with_delete_policy(DeletePolicy::Strict);
        assert!(strict.delete("missing").await.unwrap_err().is_missing_key());
    }

    #[tokio::test]
    async fn keys_strip_the_namespace() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "testprefix").await;
        let (keys, _) = seed(&server, &store, 10);
        server.set("otherprefix--randomkey-1", "nope");
        server.set("testprefixrandomkey-1", "nope");

        let listed = store.keys().await.unwrap().into_iter().sorted().collect_vec();
        assert_eq!(listed, keys.into_iter().sorted().collect_vec());
    }

    #[tokio::test]
    async fn derived_keys_stay_in_namespace() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "testprefix").await;
        let (keys, _) = seed(&server, &store, 10);
        server.set("otherprefix--randomkey-1", "nope");

        let derived = store
            .derived_keys()
            .await
            .unwrap()
            .into_iter()
            .sorted()
            .collect_vec();
        let expected = keys
            .iter()
            .map(|key| store.derive_key(key))
            .sorted()
            .collect_vec();
        assert_eq!(derived, expected);
    }

    #[tokio::test]
    async fn glob_characters_in_prefix_match_literally() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "a*").await;
        store.set("k", "mine").await.unwrap();
        server.set("ab--k", "not mine");

        assert_eq!(store.derived_keys().await.unwrap(), vec!["a*--k"]);
        assert_eq!(store.values().await.unwrap(), vec!["mine"]);
    }

    #[tokio::test]
    async fn values_fetch_every_key() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "testprefix").await;
        let (_, values) = seed(&server, &store, 10);

        let fetched = store.values().await.unwrap().into_iter().sorted().collect_vec();
        assert_eq!(fetched, values.into_iter().sorted().collect_vec());
    }

    #[tokio::test]
    async fn values_skip_keys_deleted_mid_scan() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "testprefix").await;
        let (keys, _) = seed(&server, &store, 5);

        server.vanish_on_get(&store.derive_key(&keys[2]));
        let fetched = store.values().await.unwrap();

        assert_eq!(fetched.len(), 4);
        assert!(!fetched.contains(&"value-15838".to_owned()));
        assert_eq!(store.keys().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn oversized_bulk_reply_fails_fast() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "p").await;

        server.reply_raw_next(b"$9223372036854775807\r\nabc\r\n");
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            store.get("k"),
        )
        .await
        .expect("a malformed reply must not stall the caller");

        assert!(matches!(result, Err(StoreError::Transport { op: "GET", .. })));
        assert_eq!(store.pool().idle_count(), 0);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn silent_server_hits_the_command_timeout() {
        let server = FakeRedis::start().await.unwrap();
        let pool = Pool::new(
            server.addr(),
            PoolConfig {
                command_timeout_ms: Some(100),
                ..PoolConfig::default()
            },
        );
        let store = RedisStore::new(Arc::new(pool), "p").await.unwrap();

        server.reply_raw_next(b"$5\r\nab");
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Transport { op: "GET", .. }));
    }

    #[tokio::test]
    async fn user_round_trip() {
        let server = FakeRedis::start().await.unwrap();
        let store = store(&server, "app").await;

        store.set("user:1", "alice").await.unwrap();
        assert_eq!(server.get("app--user:1").as_deref(), Some("alice"));

        store.delete("user:1").await.unwrap();
        assert_eq!(store.get("user:1").await.unwrap(), None);
        assert!(!store.contains("user:1").await.unwrap());
    }

    #[tokio::test]
    async fn stores_share_a_pool() {
        let server = FakeRedis::start().await.unwrap();
        let pool = Arc::new(Pool::new(server.addr(), PoolConfig::default()));
        let left = RedisStore::new(pool.clone(), "left").await.unwrap();
        let right = RedisStore::new(pool.clone(), "right").await.unwrap();

        left.set("k", "l").await.unwrap();
        right.set("k", "r").await.unwrap();

        assert_eq!(left.get("k").await.unwrap().as_deref(), Some("l"));
        assert_eq!(right.keys().await.unwrap(), vec!["k"]);
        assert_eq!(pool.idle_count(), 1);
    }
}

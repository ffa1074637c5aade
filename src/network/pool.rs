use std::time::Duration;

use eyre::{eyre, WrapErr};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::instrument;

use super::Connection;
use crate::encoding::resp2::{Command, Reply};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Most connections open at once; borrowers wait beyond that.
    pub max_size: usize,
    pub connect_timeout_ms: u64,
    /// Deadline for one request and its reply. `None` waits forever.
    pub command_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            connect_timeout_ms: 1_000,
            command_timeout_ms: Some(5_000),
        }
    }
}

impl PoolConfig {
    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

/// Bounded set of connections to one server, borrowed per operation.
#[derive(Debug)]
pub struct Pool {
    addr: String,
    config: PoolConfig,
    idle: Mutex<Vec<Connection>>,
    permits: Semaphore,
}

impl Pool {
    pub fn new(addr: impl Into<String>, config: PoolConfig) -> Self {
        let permits = Semaphore::new(config.max_size.max(1));
        Self {
            addr: addr.into(),
            config,
            idle: Mutex::new(vec![]),
            permits,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Borrows an idle connection or opens a new one. The connection goes
    /// back to the pool when the returned guard is dropped.
    #[instrument(skip(self), fields(addr = %self.addr), err)]
    pub async fn get(&self) -> eyre::Result<PooledConnection<'_>> {
        let permit = self.permits.acquire().await.wrap_err("Pool is closed")?;

        let idle = self.idle.lock().pop();
        let connection = match idle {
            Some(connection) => connection,
            None => {
                tracing::debug!("Opening new connection");
                tokio::time::timeout(self.config.connect_timeout(), Connection::open(&self.addr))
                    .await
                    .map_err(|_| eyre!("Timed out connecting to {}", self.addr))??
            }
        };

        Ok(PooledConnection {
            pool: self,
            connection: Some(connection),
            broken: false,
            _permit: permit,
        })
    }

    /// Closes every idle connection and stops handing out new ones.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
    }

    fn release(&self, connection: Connection) {
        self.idle.lock().push(connection);
    }
}

#[derive(Debug)]
pub struct PooledConnection<'a> {
    pool: &'a Pool,
    connection: Option<Connection>,
    broken: bool,
    _permit: SemaphorePermit<'a>,
}

impl PooledConnection<'_> {
    pub async fn request(&mut self, command: &Command) -> eyre::Result<Reply> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(eyre!("Connection was already released"));
        };

        // Stays set if the request is cancelled half way, since the reply
        // would then be left unread on the socket.
        self.broken = true;
        let result = match self.pool.config.command_timeout() {
            Some(limit) => tokio::time::timeout(limit, connection.request(command))
                .await
                .unwrap_or_else(|_| Err(eyre!("{} timed out", command.name()))),
            None => connection.request(command).await,
        };
        self.broken = result.is_err();

        result
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if self.broken {
            tracing::warn!(addr = %self.pool.addr, "Discarding broken connection");
            return;
        }
        if !self.pool.permits.is_closed() {
            self.pool.release(connection);
        }
    }
}

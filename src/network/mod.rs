mod connection;
mod pool;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use self::{
    connection::Connection,
    pool::{Pool, PoolConfig, PooledConnection},
};

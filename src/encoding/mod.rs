mod error;
pub mod resp2;

pub use error::Error;

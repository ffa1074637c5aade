use std::path::PathBuf;

use thiserror::Error;

use crate::encoding::resp2::Reply;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore missing key: {key}")]
    MissingKey { key: String },

    #[error("datasource doesn't exist: {name}")]
    DataSourceDoesNotExist { name: String },

    #[error("file already exists: {filename}")]
    FileAlreadyExists { filename: String },

    #[error("IO failed on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid json document `{}`", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to run {op} for key `{key}`")]
    Transport {
        op: &'static str,
        key: String,
        #[source]
        source: eyre::Report,
    },

    #[error(transparent)]
    Protocol(#[from] crate::encoding::Error),

    #[error("Redis rejected {op}: {message}")]
    ServerError { op: &'static str, message: String },

    #[error("Unexpected reply to {op}: {reply:?}")]
    UnexpectedReply { op: &'static str, reply: Reply },

    #[error(transparent)]
    Unhandled(#[from] eyre::Report),
}

impl StoreError {
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::MissingKey { .. })
    }

    pub fn is_data_source_does_not_exist(&self) -> bool {
        matches!(self, Self::DataSourceDoesNotExist { .. })
    }

    pub fn is_file_already_exists(&self) -> bool {
        matches!(self, Self::FileAlreadyExists { .. })
    }
}

/// Whether a type-erased error is a [`StoreError::MissingKey`].
pub fn is_missing_key(err: &eyre::Report) -> bool {
    err.downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_missing_key)
}

pub fn is_data_source_does_not_exist(err: &eyre::Report) -> bool {
    err.downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_data_source_does_not_exist)
}

pub fn is_file_already_exists(err: &eyre::Report) -> bool {
    err.downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_file_already_exists)
}

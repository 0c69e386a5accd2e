use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Profile file {} could not be parsed: {source}", path.display())]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{context}: {detail}")]
    ExternalFailure { context: String, detail: String },

    #[error("Terminal interaction failed: {0}")]
    Terminal(#[from] dialoguer::Error),
}

impl AppError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        AppError::NotFound { kind, name: name.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::InvalidSelection(message.into())
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        AppError::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn external(context: impl Into<String>, detail: impl ToString) -> Self {
        AppError::ExternalFailure { context: context.into(), detail: detail.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

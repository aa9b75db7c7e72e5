//! Typed errors of the loading/configuration protocol / 加载与配置错误

use thiserror::Error;

/// Errors raised while negotiating, loading or initializing a FileIO.
///
/// Cloneable so a failed initialization can be stored once and handed to
/// every later caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("plugin not available ({module}): {reason}")]
    PluginNotAvailable { module: String, reason: String },

    #[error("missing required options for scheme '{scheme}': {}", missing.join(", "))]
    ConfigurationValidation { scheme: String, missing: Vec<String> },

    #[error("failed to initialize filesystem for scheme '{scheme}': {reason}")]
    FilesystemInitialization { scheme: String, reason: String },

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid uri: {0}")]
    InvalidUri(String),
}

impl FsError {
    #[must_use]
    pub fn plugin_not_available(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PluginNotAvailable {
            module: module.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn initialization(scheme: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FilesystemInitialization {
            scheme: scheme.into(),
            reason: reason.into(),
        }
    }
}

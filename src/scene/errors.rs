//! Scene operation error types.

use thiserror::Error;

use crate::bridge::BridgeError;

/// Failures raised by the editor host while manipulating scenes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SceneError {
    /// A scene asset already occupies the target path.
    #[error("Scene already exists at path: {path}")]
    SceneExists { path: String },

    /// No scene asset or build entry matches the requested name.
    #[error("Scene not found: {name}")]
    SceneNotFound { name: String },

    /// The resolved path has no scene asset behind it.
    #[error("Scene file does not exist: {path}")]
    FileMissing { path: String },

    /// No open scene has the requested path.
    #[error("Scene not found in open scenes: {path}")]
    NotOpen { path: String },

    #[error("No active scene to save")]
    NoActiveScene,

    /// Writing the scene asset failed (e.g. the path is outside `Assets/`).
    #[error("Failed to save scene: {name}")]
    SaveFailed { name: String },

    #[error("Failed to save all open scenes")]
    SaveAllFailed,

    /// A scene handle no longer refers to an open scene.
    #[error("scene handle {handle} is not open")]
    StaleHandle { handle: u64 },
}

impl From<SceneError> for BridgeError {
    fn from(err: SceneError) -> Self {
        let message = err.to_string();
        match err {
            SceneError::SceneNotFound { .. }
            | SceneError::FileMissing { .. }
            | SceneError::NotOpen { .. }
            | SceneError::NoActiveScene => BridgeError::NotFound { message },
            SceneError::SceneExists { .. }
            | SceneError::SaveFailed { .. }
            | SceneError::SaveAllFailed => BridgeError::ExecutionFailed { message },
            SceneError::StaleHandle { .. } => BridgeError::Internal { message },
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

//! Scene management operations for the editor host.
//!
//! This module handles:
//! - The editor's scene state ([`EditorHost`]): open scenes, assets, build settings
//! - `create_scene`, `load_scene`, `save_scene` tools
//! - The `get_scenes` resource
//!
//! All operations run on the host thread through the bridge.

pub mod create;
pub mod errors;
pub mod load;
pub mod model;
pub mod resource;
pub mod save;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bridge::{BridgeError, Params, Registry, RegistryBuilder};

// Re-exports for convenience
pub use errors::SceneError;
pub use model::{EditorHost, OpenMode, OpenScene, SceneHandle, SceneTemplate};

/// Register every scene operation.
pub fn register_all(builder: &mut RegistryBuilder<EditorHost>) -> Result<(), BridgeError> {
    builder
        .register(create::descriptor())?
        .register(load::descriptor())?
        .register(save::descriptor())?
        .register(resource::descriptor())?;
    Ok(())
}

/// A registry holding only the scene operations.
pub fn registry() -> Result<Registry<EditorHost>, BridgeError> {
    let mut builder = Registry::builder();
    register_all(&mut builder)?;
    Ok(builder.build())
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn parse_params<T: DeserializeOwned>(
    op: &str,
    params: &Params,
) -> Result<T, BridgeError> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| BridgeError::invalid(format!("invalid parameters for '{op}': {e}")))
}

/// Unwrap a JSON object literal into a payload map.
pub(crate) fn payload(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Params::new();
            map.insert("value".into(), other);
            map
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

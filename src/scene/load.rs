//! `load_scene`: open a scene by path or name.
//!
//! Opening is deferred to the next host cycle, the way an editor finishes a
//! scene switch on its following update.

use serde::Deserialize;
use serde_json::json;

use crate::bridge::{
    AsyncOperation, BridgeError, Completion, Handler, HostCx, OperationDescriptor, Params,
};

use super::errors::SceneError;
use super::model::{EditorHost, OpenMode};
use super::{non_empty, parse_params, payload};

pub const NAME: &str = "load_scene";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadSceneParams {
    scene_path: Option<String>,
    scene_name: Option<String>,
    #[serde(default = "default_load_mode")]
    load_mode: String,
    #[serde(default = "default_true")]
    save_current_scene: bool,
}

fn default_load_mode() -> String {
    "single".to_string()
}

fn default_true() -> bool {
    true
}

impl LoadSceneParams {
    fn from_params(params: &Params) -> Result<Self, BridgeError> {
        let parsed: Self = parse_params(NAME, params)?;
        if non_empty(parsed.scene_path.as_deref()).is_none()
            && non_empty(parsed.scene_name.as_deref()).is_none()
        {
            return Err(BridgeError::invalid("Either scenePath or sceneName is required"));
        }
        Ok(parsed)
    }

    fn mode(&self) -> OpenMode {
        if self.load_mode.eq_ignore_ascii_case("additive") {
            OpenMode::Additive
        } else {
            OpenMode::Single
        }
    }
}

pub struct LoadScene;

impl AsyncOperation<EditorHost> for LoadScene {
    fn validate(&self, params: &Params) -> Result<(), BridgeError> {
        LoadSceneParams::from_params(params).map(|_| ())
    }

    fn start(
        &self,
        host: &mut HostCx<'_, EditorHost>,
        params: Params,
        done: Completion<EditorHost>,
    ) {
        host.delay_call(move |cx| done.complete(load(cx, &params)));
    }
}

fn load(host: &mut EditorHost, params: &Params) -> Result<Params, BridgeError> {
    let p = LoadSceneParams::from_params(params)?;

    let path = match non_empty(p.scene_path.as_deref()) {
        Some(path) => path.to_string(),
        None => {
            let name = non_empty(p.scene_name.as_deref()).unwrap_or_default();
            host.find_scene_path_by_name(name)
                .ok_or_else(|| SceneError::SceneNotFound { name: name.to_string() })?
        }
    };

    if !host.asset_exists(&path) {
        return Err(SceneError::FileMissing { path }.into());
    }

    if p.save_current_scene {
        save_dirty_active(host);
    }

    let mode = p.mode();
    let handle = host.open_scene(&path, mode)?;
    if mode == OpenMode::Single {
        host.set_active(handle);
    }

    let scene_name = host
        .scene(handle)
        .map(|s| s.name.clone())
        .ok_or(SceneError::StaleHandle { handle: handle.raw() })?;
    tracing::info!(path = %path, mode = ?mode, "scene loaded");

    Ok(payload(json!({
        "scenePath": path,
        "sceneName": scene_name,
        "loadMode": p.load_mode,
        "isActive": host.active_handle() == Some(handle),
        "buildIndex": host.build_index(&path),
        "message": format!("Scene '{scene_name}' loaded successfully"),
    })))
}

/// Save the active scene if it has unsaved changes. Failures only warn.
fn save_dirty_active(host: &mut EditorHost) {
    let Some(active) = host.active_scene() else {
        return;
    };
    if !active.is_dirty {
        return;
    }
    if active.path.is_none() {
        tracing::warn!(
            scene = %active.name,
            "current scene was never saved; not saving before load"
        );
        return;
    }
    let handle = active.handle;
    if let Err(e) = host.save_scene(handle, None) {
        tracing::warn!(error = %e, "failed to save current scene before loading new scene");
    }
}

pub fn descriptor() -> OperationDescriptor<EditorHost> {
    OperationDescriptor::tool(
        NAME,
        "Loads a Unity scene by path or name",
        Handler::asynchronous(LoadScene),
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "scenePath": { "type": "string" },
            "sceneName": { "type": "string" },
            "loadMode": { "type": "string", "description": "single (default) or additive" },
            "saveCurrentScene": { "type": "boolean" }
        }
    }))
}

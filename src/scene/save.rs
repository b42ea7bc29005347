//! `save_scene`: save the active scene, a specific open scene, or all of them.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::bridge::{
    AsyncOperation, BridgeError, Completion, Handler, HostCx, OperationDescriptor, Params,
};

use super::errors::SceneError;
use super::model::{EditorHost, OpenScene, SceneHandle};
use super::{non_empty, parse_params, payload};

pub const NAME: &str = "save_scene";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveSceneParams {
    #[serde(default)]
    save_all: bool,
    scene_path: Option<String>,
    #[serde(default)]
    save_as: bool,
    #[serde(default)]
    add_to_build_settings: bool,
}

pub struct SaveScene;

impl AsyncOperation<EditorHost> for SaveScene {
    fn validate(&self, params: &Params) -> Result<(), BridgeError> {
        parse_params::<SaveSceneParams>(NAME, params).map(|_| ())
    }

    fn start(
        &self,
        host: &mut HostCx<'_, EditorHost>,
        params: Params,
        done: Completion<EditorHost>,
    ) {
        done.complete(save(host, &params));
    }
}

fn save(host: &mut EditorHost, params: &Params) -> Result<Params, BridgeError> {
    let p: SaveSceneParams = parse_params(NAME, params)?;

    let saved: Vec<Value> = if p.save_all {
        save_all(host)?;
        let host: &EditorHost = host;
        host.open_scenes().iter().map(|s| scene_info(host, s)).collect()
    } else {
        let handle = save_one(host, &p)?;
        let scene = host
            .scene(handle)
            .ok_or(SceneError::StaleHandle { handle: handle.raw() })?;
        vec![scene_info(host, scene)]
    };

    let message = if p.save_all {
        "All scenes saved successfully"
    } else {
        "Scene saved successfully"
    };
    Ok(payload(json!({
        "savedScenes": saved,
        "saveAll": p.save_all,
        "message": message,
    })))
}

/// Save every dirty open scene. Never-saved scenes get a unique default path.
fn save_all(host: &mut EditorHost) -> Result<(), SceneError> {
    let dirty: Vec<(SceneHandle, String, Option<String>)> = host
        .open_scenes()
        .iter()
        .filter(|s| s.is_dirty)
        .map(|s| (s.handle, s.name.clone(), s.path.clone()))
        .collect();

    let mut all_saved = true;
    for (handle, name, path) in dirty {
        let target = match path {
            Some(path) => path,
            None => host.unique_scene_path(&name),
        };
        match host.save_scene(handle, Some(&target)) {
            Ok(_) => tracing::info!(scene = %name, path = %target, "saved scene"),
            Err(e) => {
                tracing::error!(scene = %name, path = %target, error = %e, "failed to save scene");
                all_saved = false;
            }
        }
    }

    if all_saved {
        Ok(())
    } else {
        Err(SceneError::SaveAllFailed)
    }
}

/// Pick the target scene and save it. Returns its handle.
fn save_one(host: &mut EditorHost, p: &SaveSceneParams) -> Result<SceneHandle, SceneError> {
    let requested_path = non_empty(p.scene_path.as_deref());

    let target = match (p.save_as, requested_path) {
        (false, Some(path)) => host
            .find_open_by_path(path)
            .ok_or_else(|| SceneError::NotOpen { path: path.to_string() })?,
        _ => host.active_handle().ok_or(SceneError::NoActiveScene)?,
    };

    match (p.save_as, requested_path) {
        (true, Some(path)) => {
            host.save_scene(target, Some(path))?;
            if p.add_to_build_settings {
                host.add_to_build_settings(path);
            }
        }
        _ => {
            let scene = host
                .scene(target)
                .ok_or(SceneError::StaleHandle { handle: target.raw() })?;
            let path = scene
                .path
                .clone()
                .unwrap_or_else(|| host.default_scene_path(&scene.name));
            host.save_scene(target, Some(&path))?;
        }
    }

    Ok(target)
}

fn scene_info(host: &EditorHost, scene: &OpenScene) -> Value {
    json!({
        "name": scene.name,
        "path": scene.path.clone().unwrap_or_default(),
        "isDirty": scene.is_dirty,
        "isActive": host.active_handle() == Some(scene.handle),
    })
}

pub fn descriptor() -> OperationDescriptor<EditorHost> {
    OperationDescriptor::tool(
        NAME,
        "Saves the current Unity scene or all open scenes",
        Handler::asynchronous(SaveScene),
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "saveAll": { "type": "boolean" },
            "scenePath": { "type": "string" },
            "saveAs": { "type": "boolean" },
            "addToBuildSettings": { "type": "boolean" }
        }
    }))
}

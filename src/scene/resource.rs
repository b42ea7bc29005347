//! `get_scenes` resource: open scenes, build settings, and scene assets.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::bridge::{BridgeError, Handler, HostCx, OperationDescriptor, Params, SyncOperation};

use super::model::{file_stem, parent_dir, EditorHost, OpenScene};
use super::{parse_params, payload};

pub const NAME: &str = "get_scenes";

/// URI template; `{sceneType}` is one of `open`, `build`, `assets`, `all`.
pub const URI_TEMPLATE: &str = "unity://scenes/{sceneType}";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetScenesParams {
    #[serde(default = "default_scene_type")]
    scene_type: String,
}

fn default_scene_type() -> String {
    "all".to_string()
}

pub struct GetScenes;

impl SyncOperation<EditorHost> for GetScenes {
    fn invoke(
        &self,
        host: &mut HostCx<'_, EditorHost>,
        params: Params,
    ) -> Result<Params, BridgeError> {
        let p: GetScenesParams = parse_params(NAME, &params)?;
        let host: &EditorHost = host;

        let mut out = match p.scene_type.to_ascii_lowercase().as_str() {
            "open" => json!({ "openScenes": open_scenes(host) }),
            "build" => json!({ "buildScenes": build_scenes(host) }),
            "assets" => json!({ "sceneAssets": scene_assets(host) }),
            _ => json!({
                "openScenes": open_scenes(host),
                "buildScenes": build_scenes(host),
                "sceneAssets": scene_assets(host),
                "activeScene": active_scene(host),
            }),
        };
        out["message"] = Value::String(format!(
            "Retrieved scene information for type: {}",
            p.scene_type
        ));
        Ok(payload(out))
    }
}

fn open_scene_index(host: &EditorHost, scene: &OpenScene) -> i64 {
    scene.path.as_deref().map_or(-1, |p| host.build_index(p))
}

fn open_scenes(host: &EditorHost) -> Vec<Value> {
    host.open_scenes()
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "path": s.path.clone().unwrap_or_default(),
                "buildIndex": open_scene_index(host, s),
                "isLoaded": s.is_loaded,
                "isDirty": s.is_dirty,
                "isActive": host.active_handle() == Some(s.handle),
                "rootCount": s.root_objects.len(),
            })
        })
        .collect()
}

fn build_scenes(host: &EditorHost) -> Vec<Value> {
    host.build_scenes()
        .iter()
        .enumerate()
        .map(|(i, b)| {
            json!({
                "path": b.path,
                "enabled": b.enabled,
                "buildIndex": i,
                "guid": b.guid,
                "name": file_stem(&b.path),
                "exists": host.asset_exists(&b.path),
            })
        })
        .collect()
}

/// Every scene asset, sorted by name.
fn scene_assets(host: &EditorHost) -> Vec<Value> {
    let mut assets: Vec<(String, Value)> = host
        .assets()
        .iter()
        .map(|(path, asset)| {
            let name = file_stem(path);
            let info = json!({
                "name": name,
                "path": path,
                "guid": asset.guid,
                "directory": parent_dir(path),
                "size": asset.size,
                "lastModified": asset.last_modified.format(TIMESTAMP_FORMAT).to_string(),
                "inBuildSettings": host.in_build_settings(path),
            });
            (name, info)
        })
        .collect();
    assets.sort_by(|a, b| a.0.cmp(&b.0));
    assets.into_iter().map(|(_, info)| info).collect()
}

fn active_scene(host: &EditorHost) -> Value {
    match host.active_scene() {
        Some(s) => json!({
            "name": s.name,
            "path": s.path.clone().unwrap_or_default(),
            "buildIndex": open_scene_index(host, s),
            "isLoaded": s.is_loaded,
            "isDirty": s.is_dirty,
            "rootCount": s.root_objects.len(),
        }),
        None => json!({ "error": "No active scene" }),
    }
}

pub fn descriptor() -> OperationDescriptor<EditorHost> {
    OperationDescriptor::resource(
        NAME,
        URI_TEMPLATE,
        "Retrieves information about Unity scenes including open scenes, \
         scenes in build settings, and all scene assets",
        Handler::sync(GetScenes),
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "sceneType": { "type": "string", "description": "open, build, assets or all (default)" }
        }
    }))
}

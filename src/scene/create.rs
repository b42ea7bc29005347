//! `create_scene`: create, save, and optionally activate a new scene.

use serde::Deserialize;
use serde_json::json;

use crate::bridge::{
    AsyncOperation, BridgeError, Completion, Handler, HostCx, OperationDescriptor, Params,
};

use super::errors::SceneError;
use super::model::{EditorHost, OpenMode, SceneTemplate, SCENE_EXTENSION};
use super::{non_empty, parse_params, payload};

pub const NAME: &str = "create_scene";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSceneParams {
    scene_name: Option<String>,
    scene_path: Option<String>,
    #[serde(default = "default_template")]
    template_type: String,
    #[serde(default = "default_true")]
    set_active: bool,
    #[serde(default)]
    add_to_build_settings: bool,
}

fn default_template() -> String {
    "empty".to_string()
}

fn default_true() -> bool {
    true
}

impl CreateSceneParams {
    fn from_params(params: &Params) -> Result<Self, BridgeError> {
        let parsed: Self = parse_params(NAME, params)?;
        if non_empty(parsed.scene_name.as_deref()).is_none() {
            return Err(BridgeError::invalid("Scene name is required"));
        }
        Ok(parsed)
    }
}

/// Completes within the cycle that starts it.
pub struct CreateScene;

impl AsyncOperation<EditorHost> for CreateScene {
    fn validate(&self, params: &Params) -> Result<(), BridgeError> {
        CreateSceneParams::from_params(params).map(|_| ())
    }

    fn start(
        &self,
        host: &mut HostCx<'_, EditorHost>,
        params: Params,
        done: Completion<EditorHost>,
    ) {
        done.complete(create(host, &params));
    }
}

fn create(host: &mut EditorHost, params: &Params) -> Result<Params, BridgeError> {
    let p = CreateSceneParams::from_params(params)?;
    let name = non_empty(p.scene_name.as_deref()).unwrap_or_default();

    let path = match non_empty(p.scene_path.as_deref()) {
        None => host.default_scene_path(name),
        Some(path) if path.ends_with(SCENE_EXTENSION) => path.to_string(),
        Some(path) => format!("{path}{SCENE_EXTENSION}"),
    };

    if host.asset_exists(&path) {
        return Err(SceneError::SceneExists { path }.into());
    }

    let template = SceneTemplate::parse(&p.template_type);
    let handle = host.new_scene(name, template, OpenMode::Single);
    host.save_scene(handle, Some(&path))?;
    tracing::info!(scene = %name, path = %path, template = ?template, "scene created");

    if p.add_to_build_settings {
        host.add_to_build_settings(&path);
    }
    if p.set_active {
        host.set_active(handle);
    }

    Ok(payload(json!({
        "scenePath": path,
        "sceneName": name,
        "templateType": &p.template_type,
        "isActive": p.set_active,
        "addedToBuildSettings": p.add_to_build_settings,
        "message": format!("Scene '{name}' created successfully at {path}"),
    })))
}

pub fn descriptor() -> OperationDescriptor<EditorHost> {
    OperationDescriptor::tool(
        NAME,
        "Creates a new Unity scene with specified name and optional template",
        Handler::asynchronous(CreateScene),
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "sceneName": { "type": "string", "description": "Name of the new scene" },
            "scenePath": {
                "type": "string",
                "description": "Asset path; defaults to <scenes dir>/<sceneName>.unity"
            },
            "templateType": {
                "type": "string",
                "description": "empty, basic, 2d or 3d (default empty)"
            },
            "setActive": { "type": "boolean" },
            "addToBuildSettings": { "type": "boolean" }
        },
        "required": ["sceneName"]
    }))
}

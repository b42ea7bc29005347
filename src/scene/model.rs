//! Editor host state: open scenes, the scene asset database, and build
//! settings.
//!
//! `EditorHost` is the state owned by the host loop. It is only ever touched
//! from inside a host cycle, so nothing here is synchronized.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::errors::SceneError;

/// Every scene asset lives under this root.
pub const ASSETS_ROOT: &str = "Assets/";

/// Scene asset file extension.
pub const SCENE_EXTENSION: &str = ".unity";

// ─── Scene Types ─────────────────────────────────────────────────────────────

/// Identifies an open scene for as long as it stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(u64);

impl SceneHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSettings {
    pub orthographic: bool,
    pub orthographic_size: f32,
    pub field_of_view: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            orthographic: false,
            orthographic_size: 5.0,
            field_of_view: 60.0,
        }
    }
}

/// Starting content for a new scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneTemplate {
    /// No objects at all.
    Empty,
    /// Default camera and light.
    Basic,
    /// Default objects with an orthographic camera.
    TwoD,
    /// Default objects with a perspective camera.
    ThreeD,
}

impl SceneTemplate {
    /// Parse a template name case-insensitively. Unrecognized names get the 3D setup.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "empty" => Self::Empty,
            "basic" => Self::Basic,
            "2d" => Self::TwoD,
            _ => Self::ThreeD,
        }
    }

    fn root_objects(self) -> Vec<String> {
        match self {
            Self::Empty => Vec::new(),
            _ => vec!["Main Camera".to_string(), "Directional Light".to_string()],
        }
    }

    fn camera(self) -> Option<CameraSettings> {
        match self {
            Self::Empty => None,
            Self::Basic | Self::ThreeD => Some(CameraSettings::default()),
            Self::TwoD => Some(CameraSettings {
                orthographic: true,
                ..CameraSettings::default()
            }),
        }
    }
}

/// How a scene joins the set of open scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Close everything else first.
    Single,
    /// Keep the current scenes open alongside.
    Additive,
}

/// A scene currently open in the editor.
#[derive(Debug, Clone)]
pub struct OpenScene {
    pub handle: SceneHandle,
    pub name: String,
    /// `None` until the scene is first saved.
    pub path: Option<String>,
    pub is_dirty: bool,
    pub is_loaded: bool,
    pub root_objects: Vec<String>,
    pub camera: Option<CameraSettings>,
}

/// Serialized scene content, as written to an asset.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct SceneContent {
    root_objects: Vec<String>,
    camera: Option<CameraSettings>,
}

/// A scene file in the project's asset database.
#[derive(Debug, Clone)]
pub struct SceneAsset {
    pub guid: String,
    pub size: u64,
    pub last_modified: DateTime<Local>,
    content: SceneContent,
}

impl SceneAsset {
    pub fn root_objects(&self) -> &[String] {
        &self.content.root_objects
    }
}

/// An entry in the build settings scene list.
#[derive(Debug, Clone)]
pub struct BuildScene {
    pub path: String,
    pub enabled: bool,
    pub guid: String,
}

// ─── EditorHost ──────────────────────────────────────────────────────────────

/// The editor's scene state.
#[derive(Debug)]
pub struct EditorHost {
    scenes_dir: String,
    open: Vec<OpenScene>,
    active: Option<SceneHandle>,
    assets: BTreeMap<String, SceneAsset>,
    build: Vec<BuildScene>,
    next_handle: u64,
}

impl EditorHost {
    /// A host with a single untitled, unsaved scene open.
    pub fn new(scenes_dir: impl Into<String>) -> Self {
        let mut host = Self {
            scenes_dir: scenes_dir.into().trim_end_matches('/').to_string(),
            open: Vec::new(),
            active: None,
            assets: BTreeMap::new(),
            build: Vec::new(),
            next_handle: 1,
        };
        let untitled = host.new_scene("Untitled", SceneTemplate::Basic, OpenMode::Single);
        if let Some(scene) = host.scene_mut(untitled) {
            scene.is_dirty = false;
        }
        host
    }

    /// Add empty scene assets at each path (used to describe an existing project).
    pub fn with_seed_scenes<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            let path = path.as_ref();
            if let Err(e) = self.write_asset(path, SceneContent::default()) {
                tracing::warn!(path, error = %e, "skipping seed scene");
            }
        }
        self
    }

    pub fn scenes_dir(&self) -> &str {
        &self.scenes_dir
    }

    /// `<scenes_dir>/<name>.unity`
    pub fn default_scene_path(&self, name: &str) -> String {
        format!("{}/{name}{SCENE_EXTENSION}", self.scenes_dir)
    }

    /// The default path for `name`, suffixed `_1`, `_2`, ... until no asset
    /// occupies it.
    pub fn unique_scene_path(&self, name: &str) -> String {
        let mut candidate = self.default_scene_path(name);
        let mut counter = 1;
        while self.asset_exists(&candidate) {
            candidate = self.default_scene_path(&format!("{name}_{counter}"));
            counter += 1;
        }
        candidate
    }

    // ── Open scenes ──

    pub fn open_scenes(&self) -> &[OpenScene] {
        &self.open
    }

    pub fn scene(&self, handle: SceneHandle) -> Option<&OpenScene> {
        self.open.iter().find(|s| s.handle == handle)
    }

    pub fn scene_mut(&mut self, handle: SceneHandle) -> Option<&mut OpenScene> {
        self.open.iter_mut().find(|s| s.handle == handle)
    }

    pub fn active_handle(&self) -> Option<SceneHandle> {
        self.active
    }

    pub fn active_scene(&self) -> Option<&OpenScene> {
        self.active.and_then(|h| self.scene(h))
    }

    /// Make an open scene the active one. Returns `false` if it is not open.
    pub fn set_active(&mut self, handle: SceneHandle) -> bool {
        if self.scene(handle).is_some() {
            self.active = Some(handle);
            true
        } else {
            false
        }
    }

    /// Find an open scene by path, ignoring ASCII case.
    pub fn find_open_by_path(&self, path: &str) -> Option<SceneHandle> {
        self.open
            .iter()
            .find(|s| s.path.as_deref().is_some_and(|p| p.eq_ignore_ascii_case(path)))
            .map(|s| s.handle)
    }

    /// Create a new unsaved scene.
    pub fn new_scene(
        &mut self,
        name: &str,
        template: SceneTemplate,
        mode: OpenMode,
    ) -> SceneHandle {
        let handle = self.allocate_handle();
        let scene = OpenScene {
            handle,
            name: name.to_string(),
            path: None,
            is_dirty: true,
            is_loaded: true,
            root_objects: template.root_objects(),
            camera: template.camera(),
        };
        self.attach(scene, mode);
        handle
    }

    /// Open the scene asset at `path`.
    ///
    /// Additively opening a scene that is already open returns its existing handle.
    pub fn open_scene(&mut self, path: &str, mode: OpenMode) -> Result<SceneHandle, SceneError> {
        let asset = self.assets.get(path).ok_or_else(|| SceneError::FileMissing {
            path: path.to_string(),
        })?;
        let content = asset.content.clone();

        if mode == OpenMode::Additive {
            if let Some(existing) = self.find_open_by_path(path) {
                return Ok(existing);
            }
        }

        let handle = self.allocate_handle();
        let scene = OpenScene {
            handle,
            name: file_stem(path),
            path: Some(path.to_string()),
            is_dirty: false,
            is_loaded: true,
            root_objects: content.root_objects,
            camera: content.camera,
        };
        self.attach(scene, mode);
        Ok(handle)
    }

    /// Save an open scene to `path`, or to its current path when `None`.
    ///
    /// The scene takes its name from the file it is saved to.
    pub fn save_scene(
        &mut self,
        handle: SceneHandle,
        path: Option<&str>,
    ) -> Result<String, SceneError> {
        let scene = self.scene(handle).ok_or(SceneError::StaleHandle { handle: handle.raw() })?;
        let target = match path.map(str::to_string).or_else(|| scene.path.clone()) {
            Some(target) => target,
            None => {
                return Err(SceneError::SaveFailed {
                    name: scene.name.clone(),
                })
            }
        };
        let content = SceneContent {
            root_objects: scene.root_objects.clone(),
            camera: scene.camera,
        };
        let name = scene.name.clone();

        self.write_asset(&target, content).map_err(|_| SceneError::SaveFailed { name })?;

        if let Some(scene) = self.scene_mut(handle) {
            scene.name = file_stem(&target);
            scene.path = Some(target.clone());
            scene.is_dirty = false;
        }
        tracing::debug!(path = %target, "scene saved");
        Ok(target)
    }

    /// Add a root object to an open scene, marking it dirty.
    pub fn add_root_object(&mut self, handle: SceneHandle, object: &str) -> Result<(), SceneError> {
        let scene = self
            .scene_mut(handle)
            .ok_or(SceneError::StaleHandle { handle: handle.raw() })?;
        scene.root_objects.push(object.to_string());
        scene.is_dirty = true;
        Ok(())
    }

    // ── Asset database ──

    pub fn asset_exists(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    pub fn assets(&self) -> &BTreeMap<String, SceneAsset> {
        &self.assets
    }

    /// Resolve a scene name to a path: asset database first, then build
    /// settings. Compares file stems ignoring ASCII case.
    pub fn find_scene_path_by_name(&self, name: &str) -> Option<String> {
        self.assets
            .keys()
            .find(|path| file_stem(path).eq_ignore_ascii_case(name))
            .or_else(|| {
                self.build
                    .iter()
                    .map(|b| &b.path)
                    .find(|path| file_stem(path).eq_ignore_ascii_case(name))
            })
            .cloned()
    }

    // ── Build settings ──

    pub fn build_scenes(&self) -> &[BuildScene] {
        &self.build
    }

    /// Append `path` to build settings. Returns `false` if it is already listed.
    pub fn add_to_build_settings(&mut self, path: &str) -> bool {
        if self.build.iter().any(|b| b.path == path) {
            tracing::debug!(path, "scene already in build settings");
            return false;
        }
        let guid = self
            .assets
            .get(path)
            .map(|a| a.guid.clone())
            .unwrap_or_else(new_guid);
        self.build.push(BuildScene {
            path: path.to_string(),
            enabled: true,
            guid,
        });
        tracing::info!(path, "scene added to build settings");
        true
    }

    pub fn in_build_settings(&self, path: &str) -> bool {
        self.build.iter().any(|b| b.path.eq_ignore_ascii_case(path))
    }

    /// Runtime build index: position among enabled build scenes, or -1.
    pub fn build_index(&self, path: &str) -> i64 {
        self.build
            .iter()
            .filter(|b| b.enabled)
            .position(|b| b.path == path)
            .map_or(-1, |i| i as i64)
    }

    // ── Internals ──

    fn allocate_handle(&mut self) -> SceneHandle {
        let handle = SceneHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn attach(&mut self, scene: OpenScene, mode: OpenMode) {
        let handle = scene.handle;
        match mode {
            OpenMode::Single => {
                self.open.clear();
                self.open.push(scene);
                self.active = Some(handle);
            }
            OpenMode::Additive => {
                self.open.push(scene);
                if self.active.is_none() {
                    self.active = Some(handle);
                }
            }
        }
    }

    fn write_asset(&mut self, path: &str, content: SceneContent) -> Result<(), SceneError> {
        if !is_scene_asset_path(path) {
            return Err(SceneError::SaveFailed {
                name: file_stem(path),
            });
        }
        let size = serde_json::to_vec(&content).map_or(0, |bytes| bytes.len() as u64);
        let guid = self
            .assets
            .get(path)
            .map(|a| a.guid.clone())
            .unwrap_or_else(new_guid);
        self.assets.insert(
            path.to_string(),
            SceneAsset {
                guid,
                size,
                last_modified: Local::now(),
                content,
            },
        );
        Ok(())
    }
}

/// Whether `path` names a scene file under the assets root.
pub fn is_scene_asset_path(path: &str) -> bool {
    path.starts_with(ASSETS_ROOT)
        && path.ends_with(SCENE_EXTENSION)
        && path.len() > ASSETS_ROOT.len() + SCENE_EXTENSION.len()
}

/// File name without extension.
pub fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parent directory of an asset path.
pub fn parent_dir(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn new_guid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

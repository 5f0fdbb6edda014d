//! Plugin discovery and loading (§6, "Plugin discovery (optional)").
//!
//! There is no dynamic-library loading here — the CORE has no `libloading`
//! dependency and the teacher's stack does not carry one either. Instead
//! this is a manifest-validation-plus-factory-registry pattern: a plugin
//! directory's `manifest.json` is validated, its `entry` is resolved
//! against a compile-time-registered factory, and the factory constructs
//! the actual [`crate::Module`]. This mirrors the teacher's
//! `toka-kernel::registry` extension point (register by name, dispatch by
//! lookup) applied to whole modules instead of individual opcodes.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use warden_types::Json;

use crate::manifest::{Manifest, ModuleType};
use crate::module::Module;

/// A factory that constructs a module instance from its on-disk manifest.
pub type ModuleFactory = Arc<dyn Fn(&Manifest) -> Result<Arc<dyn Module>, String> + Send + Sync>;

/// Failure modes of plugin discovery/loading (§6).
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin directory has no `manifest.json`.
    #[error("plugin directory '{0}' has no manifest.json")]
    NoManifest(String),
    /// `manifest.json` is not valid JSON.
    #[error("plugin '{0}' has invalid manifest JSON: {1}")]
    InvalidJSON(String, String),
    /// A required manifest field is missing.
    #[error("plugin '{0}' manifest is missing required field '{1}'")]
    MissingField(String, &'static str),
    /// A manifest field is present but has the wrong type.
    #[error("plugin '{0}' manifest field '{1}' has the wrong type")]
    InvalidType(String, &'static str),
    /// The manifest's `entry` (or its id, if `entry` is absent) does not
    /// name a registered factory.
    #[error("plugin '{0}' entry '{1}' is not registered")]
    MissingEntry(String, String),
    /// The manifest's `id` does not match the id the constructed module
    /// reports from its own `Manifest`.
    #[error("plugin '{0}' manifest id does not match constructed module id '{1}'")]
    IdMismatch(String, String),
    /// The factory itself failed to construct a module.
    #[error("plugin '{0}' factory failed: {1}")]
    BadExport(String, String),
}

fn module_type_from_str(s: &str) -> Option<ModuleType> {
    match s {
        "connector" => Some(ModuleType::Connector),
        "detector" => Some(ModuleType::Detector),
        "enricher" => Some(ModuleType::Enricher),
        "action" => Some(ModuleType::Action),
        "notifier" => Some(ModuleType::Notifier),
        "uiExtension" => Some(ModuleType::UiExtension),
        "openClawTool" => Some(ModuleType::OpenClawTool),
        _ => None,
    }
}

fn parse_manifest(plugin_name: &str, raw: &Json) -> Result<Manifest, PluginError> {
    let obj = raw.as_object().ok_or_else(|| PluginError::InvalidType(plugin_name.to_string(), "manifest"))?;

    let id = obj.get("id").ok_or_else(|| PluginError::MissingField(plugin_name.to_string(), "id"))?;
    let id = id.as_str().ok_or_else(|| PluginError::InvalidType(plugin_name.to_string(), "id"))?.to_string();

    let name = obj.get("name").ok_or_else(|| PluginError::MissingField(plugin_name.to_string(), "name"))?;
    let name = name.as_str().ok_or_else(|| PluginError::InvalidType(plugin_name.to_string(), "name"))?.to_string();

    let version = obj.get("version").ok_or_else(|| PluginError::MissingField(plugin_name.to_string(), "version"))?;
    let version = version.as_str().ok_or_else(|| PluginError::InvalidType(plugin_name.to_string(), "version"))?.to_string();

    let module_type = obj.get("type").ok_or_else(|| PluginError::MissingField(plugin_name.to_string(), "type"))?;
    let module_type = module_type.as_str().ok_or_else(|| PluginError::InvalidType(plugin_name.to_string(), "type"))?;
    let module_type = module_type_from_str(module_type).ok_or_else(|| PluginError::InvalidType(plugin_name.to_string(), "type"))?;

    Ok(Manifest::new(id, name, version, module_type))
}

fn resolve_entry(plugin_name: &str, manifest: &Manifest, raw: &Json) -> Result<String, PluginError> {
    match raw.get("entry") {
        None => Ok(manifest.id.clone()),
        Some(Json::String(s)) => Ok(s.clone()),
        Some(_) => Err(PluginError::InvalidType(plugin_name.to_string(), "entry")),
    }
}

/// A registry of compile-time factories, keyed by the `entry` name a
/// plugin manifest resolves to.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl PluginRegistry {
    /// Builds an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `entry`.
    pub fn register(&mut self, entry: impl Into<String>, factory: ModuleFactory) {
        self.factories.insert(entry.into(), factory);
    }

    /// Loads a single plugin directory.
    pub fn load_one(&self, plugin_dir: &Path) -> Result<Arc<dyn Module>, PluginError> {
        let plugin_name = plugin_dir.file_name().and_then(|n| n.to_str()).unwrap_or("<unknown>").to_string();

        let manifest_path = plugin_dir.join("manifest.json");
        let contents = fs::read_to_string(&manifest_path).map_err(|_| PluginError::NoManifest(plugin_name.clone()))?;

        let raw: Json = serde_json::from_str(&contents).map_err(|e| PluginError::InvalidJSON(plugin_name.clone(), e.to_string()))?;

        let manifest = parse_manifest(&plugin_name, &raw)?;
        let entry = resolve_entry(&plugin_name, &manifest, &raw)?;

        let factory = self.factories.get(&entry).ok_or_else(|| PluginError::MissingEntry(plugin_name.clone(), entry.clone()))?;

        let module = factory(&manifest).map_err(|e| PluginError::BadExport(plugin_name.clone(), e))?;
        if module.manifest().id != manifest.id {
            return Err(PluginError::IdMismatch(plugin_name.clone(), module.manifest().id.clone()));
        }

        Ok(module)
    }

    /// Loads every immediate subdirectory of `root` as a plugin. Per-plugin
    /// failures are collected rather than aborting discovery — a broken
    /// plugin is reported, not fatal to the host (§7, "Propagation
    /// policy").
    pub fn load_directory(&self, root: &Path) -> Vec<(String, Result<Arc<dyn Module>, PluginError>)> {
        let mut results = Vec::new();
        let Ok(entries) = fs::read_dir(root) else {
            return results;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("<unknown>").to_string();
            let result = self.load_one(&path);
            if let Err(e) = &result {
                tracing::warn!(plugin = %name, error = %e, "plugin failed to load");
            }
            results.push((name, result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ModuleContext, ModuleHealth};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct StubModule(Manifest);

    #[async_trait]
    impl Module for StubModule {
        fn manifest(&self) -> &Manifest {
            &self.0
        }
        async fn initialize(&self, _context: ModuleContext) -> anyhow::Result<()> {
            Ok(())
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn destroy(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn health(&self) -> ModuleHealth {
            ModuleHealth::healthy()
        }
    }

    fn write_manifest(dir: &Path, body: &str) {
        fs::write(dir.join("manifest.json"), body).unwrap();
    }

    #[test]
    fn missing_manifest_reports_no_manifest() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();

        let registry = PluginRegistry::new();
        assert!(matches!(registry.load_one(&plugin_dir), Err(PluginError::NoManifest(_))));
    }

    #[test]
    fn invalid_json_is_reported() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, "{not json");

        let registry = PluginRegistry::new();
        assert!(matches!(registry.load_one(&plugin_dir), Err(PluginError::InvalidJSON(_, _))));
    }

    #[test]
    fn missing_field_is_reported() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, r#"{"name":"x","version":"1.0","type":"detector"}"#);

        let registry = PluginRegistry::new();
        assert!(matches!(registry.load_one(&plugin_dir), Err(PluginError::MissingField(_, "id"))));
    }

    #[test]
    fn invalid_type_field_is_reported() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, r#"{"id":"x","name":"x","version":"1.0","type":"not-a-real-type"}"#);

        let registry = PluginRegistry::new();
        assert!(matches!(registry.load_one(&plugin_dir), Err(PluginError::InvalidType(_, "type"))));
    }

    #[test]
    fn missing_entry_is_reported_when_no_factory_registered() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, r#"{"id":"plugin-a","name":"x","version":"1.0","type":"detector"}"#);

        let registry = PluginRegistry::new();
        assert!(matches!(registry.load_one(&plugin_dir), Err(PluginError::MissingEntry(_, _))));
    }

    #[test]
    fn id_mismatch_is_reported() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, r#"{"id":"plugin-a","name":"x","version":"1.0","type":"detector"}"#);

        let mut registry = PluginRegistry::new();
        registry.register(
            "plugin-a",
            Arc::new(|_m: &Manifest| Ok(Arc::new(StubModule(Manifest::new("different-id", "x", "1.0", ModuleType::Detector))) as Arc<dyn Module>)),
        );
        assert!(matches!(registry.load_one(&plugin_dir), Err(PluginError::IdMismatch(_, _))));
    }

    #[test]
    fn bad_export_is_reported_when_factory_errors() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, r#"{"id":"plugin-a","name":"x","version":"1.0","type":"detector"}"#);

        let mut registry = PluginRegistry::new();
        registry.register("plugin-a", Arc::new(|_m: &Manifest| Err("construction exploded".to_string())));
        assert!(matches!(registry.load_one(&plugin_dir), Err(PluginError::BadExport(_, _))));
    }

    #[test]
    fn well_formed_plugin_loads_successfully() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("plugin-a");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, r#"{"id":"plugin-a","name":"x","version":"1.0","type":"detector"}"#);

        let mut registry = PluginRegistry::new();
        registry.register(
            "plugin-a",
            Arc::new(|m: &Manifest| Ok(Arc::new(StubModule(m.clone())) as Arc<dyn Module>)),
        );
        let module = registry.load_one(&plugin_dir).unwrap();
        assert_eq!(module.manifest().id, "plugin-a");
    }
}

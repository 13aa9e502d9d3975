use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::TrackerBackend;

type BackendFactory = Box<dyn Fn() -> Result<Box<dyn TrackerBackend>> + Send + Sync>;

/// Registry of tracker backend factories, selected by name from configuration.
///
/// The pipeline owns its backend exclusively, so the registry hands out fresh
/// instances rather than shared handles.
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn TrackerBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Build the named backend and run its warm-up hook.
    pub fn create(&self, name: &str) -> Result<Box<dyn TrackerBackend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        let mut backend = factory()?;
        backend.warm_up()?;
        Ok(backend)
    }

    pub fn create_default(&self) -> Result<Box<dyn TrackerBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no tracker backends registered"))?;
        self.create(name)
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Scene, ScriptedTracker, StubTracker};
    use std::sync::Arc;

    fn registry() -> BackendRegistry {
        let scene = Arc::new(Scene::demo());
        let mut registry = BackendRegistry::new();
        registry.register("stub", || Ok(Box::new(StubTracker::new())));
        registry.register("scripted", move || {
            Ok(Box::new(ScriptedTracker::new(scene.clone())))
        });
        registry
    }

    #[test]
    fn first_registered_backend_is_default() {
        let backend = registry().create_default().unwrap();
        assert_eq!(backend.name(), "stub");
    }

    #[test]
    fn creates_named_backend() {
        let mut registry = registry();
        registry.set_default("scripted").unwrap();
        assert_eq!(registry.create_default().unwrap().name(), "scripted");
        assert_eq!(registry.list(), vec!["scripted", "stub"]);
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = registry();
        let err = registry.create("yolo").err().expect("missing backend");
        assert!(format!("{err}").contains("not registered"));
        assert!(registry.set_default("yolo").is_err());
    }
}

use super::*;
use crate::errors::{Result, SwitchError};
use crate::session::Session;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Noop(&'static str);

#[async_trait]
impl Application for Noop {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(&self, _session: &Arc<Session>, _data: &str) -> Result<()> {
        Ok(())
    }
}

struct AppsModule {
    name: &'static str,
    apps: Vec<&'static str>,
    refuse_unload: bool,
    shutdowns: AtomicUsize,
}

impl AppsModule {
    fn new(name: &'static str, apps: Vec<&'static str>) -> Self {
        Self {
            name,
            apps,
            refuse_unload: false,
            shutdowns: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Module for AppsModule {
    fn name(&self) -> &str {
        self.name
    }

    async fn load(&self, interfaces: &mut ModuleInterfaces) -> Result<()> {
        for app in &self.apps {
            interfaces.add_application(Arc::new(Noop(*app)));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.refuse_unload {
            return Err(SwitchError::NoUnload {
                name: self.name.to_string(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_load_and_lookup() {
    let registry = ModuleRegistry::new();
    let loaded = registry
        .load(Arc::new(AppsModule::new("mod_test", vec!["answer", "park"])))
        .await
        .unwrap();
    assert_eq!(loaded.provides().len(), 2);
    assert_eq!(registry.list(InterfaceKind::Application), vec!["answer", "park"]);
    assert_eq!(registry.module_names(), vec!["mod_test"]);

    let app = registry.application("park").unwrap();
    assert_eq!(app.name(), "park");
    assert_eq!(app.module_name(), "mod_test");
    assert_eq!(loaded.refs(), 1);
    drop(app);
    assert_eq!(loaded.refs(), 0);

    assert!(registry.application("missing").is_none());
    assert!(registry.endpoint("park").is_none());
}

#[tokio::test]
async fn test_duplicate_module_rejected() {
    let registry = ModuleRegistry::new();
    registry
        .load(Arc::new(AppsModule::new("mod_test", vec!["a"])))
        .await
        .unwrap();
    let err = registry
        .load(Arc::new(AppsModule::new("mod_test", vec!["b"])))
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::Module { .. }));
    assert!(registry.application("b").is_none());
}

#[tokio::test]
async fn test_duplicate_interface_keeps_first() {
    let registry = ModuleRegistry::new();
    registry
        .load(Arc::new(AppsModule::new("first", vec!["answer"])))
        .await
        .unwrap();
    registry
        .load(Arc::new(AppsModule::new("second", vec!["answer", "echo"])))
        .await
        .unwrap();
    assert_eq!(registry.application("answer").unwrap().module_name(), "first");
    assert_eq!(registry.application("echo").unwrap().module_name(), "second");
}

#[tokio::test]
async fn test_unload_refused_while_protected() {
    let registry = ModuleRegistry::new();
    let module = Arc::new(AppsModule::new("mod_test", vec!["answer"]));
    registry.load(module.clone()).await.unwrap();

    let guard = registry.application("answer").unwrap();
    let second = guard.try_clone().unwrap();
    let err = registry.unload("mod_test").await.unwrap_err();
    assert!(matches!(err, SwitchError::InUse { .. }));
    assert_eq!(module.shutdowns.load(Ordering::SeqCst), 0);

    drop(guard);
    assert!(registry.unload("mod_test").await.is_err());
    drop(second);

    registry.unload("mod_test").await.unwrap();
    assert_eq!(module.shutdowns.load(Ordering::SeqCst), 1);
    assert!(registry.application("answer").is_none());
    assert!(registry.module("mod_test").is_none());
}

#[tokio::test]
async fn test_module_may_refuse_unload() {
    let registry = ModuleRegistry::new();
    let mut module = AppsModule::new("mod_sticky", vec!["answer"]);
    module.refuse_unload = true;
    registry.load(Arc::new(module)).await.unwrap();

    let err = registry.unload("mod_sticky").await.unwrap_err();
    assert!(matches!(err, SwitchError::NoUnload { .. }));
    assert!(registry.application("answer").is_some());

    registry.unload_all().await;
    assert_eq!(registry.module_names(), vec!["mod_sticky"]);
}

#[tokio::test]
async fn test_unload_unknown() {
    let registry = ModuleRegistry::new();
    let err = registry.unload("nope").await.unwrap_err();
    assert!(matches!(err, SwitchError::NotFound { .. }));
}

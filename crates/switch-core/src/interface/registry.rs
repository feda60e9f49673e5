//! Loaded modules and their interface tables
//!
//! Using an interface always goes module first, interface second: a
//! [`ModuleGuard`] read-locks the owning module and only then can an
//! [`InterfaceGuard`] read-lock the interface. Unload takes the module's write
//! lock, so it cannot start while any guard is alive and no guard can be
//! created once it has.

use super::{
    Application, AsrInterface, ChatInterface, CodecInterface, DialplanInterface,
    DirectoryInterface, Endpoint, FileInterface, LimitInterface, ManagementInterface,
    SayInterface, SpeechInterface, TimerInterface,
};
use crate::errors::{Result, SwitchError};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock as AsyncRwLock};
use tracing::{debug, info, warn};

/// Kinds of capability a module may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Endpoint,
    Codec,
    Application,
    Dialplan,
    Timer,
    File,
    Asr,
    Speech,
    Directory,
    Say,
    Chat,
    Management,
    Limit,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Endpoint => "endpoint",
            InterfaceKind::Codec => "codec",
            InterfaceKind::Application => "application",
            InterfaceKind::Dialplan => "dialplan",
            InterfaceKind::Timer => "timer",
            InterfaceKind::File => "file",
            InterfaceKind::Asr => "asr",
            InterfaceKind::Speech => "speech",
            InterfaceKind::Directory => "directory",
            InterfaceKind::Say => "say",
            InterfaceKind::Chat => "chat",
            InterfaceKind::Management => "management",
            InterfaceKind::Limit => "limit",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loadable module.
///
/// `load` registers interfaces through the [`ModuleInterfaces`] collector.
/// `shutdown` runs with the module write-locked during unload; returning
/// [`SwitchError::NoUnload`] keeps the module loaded.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, interfaces: &mut ModuleInterfaces) -> Result<()>;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Interfaces a module registers while loading
#[derive(Default)]
pub struct ModuleInterfaces {
    pub(crate) endpoints: Vec<Arc<dyn Endpoint>>,
    pub(crate) codecs: Vec<Arc<dyn CodecInterface>>,
    pub(crate) applications: Vec<Arc<dyn Application>>,
    pub(crate) dialplans: Vec<Arc<dyn DialplanInterface>>,
    pub(crate) timers: Vec<Arc<dyn TimerInterface>>,
    pub(crate) files: Vec<Arc<dyn FileInterface>>,
    pub(crate) asr: Vec<Arc<dyn AsrInterface>>,
    pub(crate) speech: Vec<Arc<dyn SpeechInterface>>,
    pub(crate) directories: Vec<Arc<dyn DirectoryInterface>>,
    pub(crate) say: Vec<Arc<dyn SayInterface>>,
    pub(crate) chat: Vec<Arc<dyn ChatInterface>>,
    pub(crate) management: Vec<Arc<dyn ManagementInterface>>,
    pub(crate) limits: Vec<Arc<dyn LimitInterface>>,
}

impl ModuleInterfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(&mut self, endpoint: Arc<dyn Endpoint>) -> &mut Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn add_codec(&mut self, codec: Arc<dyn CodecInterface>) -> &mut Self {
        self.codecs.push(codec);
        self
    }

    pub fn add_application(&mut self, application: Arc<dyn Application>) -> &mut Self {
        self.applications.push(application);
        self
    }

    pub fn add_dialplan(&mut self, dialplan: Arc<dyn DialplanInterface>) -> &mut Self {
        self.dialplans.push(dialplan);
        self
    }

    pub fn add_timer(&mut self, timer: Arc<dyn TimerInterface>) -> &mut Self {
        self.timers.push(timer);
        self
    }

    pub fn add_file(&mut self, file: Arc<dyn FileInterface>) -> &mut Self {
        self.files.push(file);
        self
    }

    pub fn add_asr(&mut self, asr: Arc<dyn AsrInterface>) -> &mut Self {
        self.asr.push(asr);
        self
    }

    pub fn add_speech(&mut self, speech: Arc<dyn SpeechInterface>) -> &mut Self {
        self.speech.push(speech);
        self
    }

    pub fn add_directory(&mut self, directory: Arc<dyn DirectoryInterface>) -> &mut Self {
        self.directories.push(directory);
        self
    }

    pub fn add_say(&mut self, say: Arc<dyn SayInterface>) -> &mut Self {
        self.say.push(say);
        self
    }

    pub fn add_chat(&mut self, chat: Arc<dyn ChatInterface>) -> &mut Self {
        self.chat.push(chat);
        self
    }

    pub fn add_management(&mut self, management: Arc<dyn ManagementInterface>) -> &mut Self {
        self.management.push(management);
        self
    }

    pub fn add_limit(&mut self, limit: Arc<dyn LimitInterface>) -> &mut Self {
        self.limits.push(limit);
        self
    }
}

/// A module as tracked by the registry
pub struct LoadableModule {
    name: String,
    module: Arc<dyn Module>,
    lock: Arc<AsyncRwLock<()>>,
    refs: AtomicUsize,
    provides: Vec<(InterfaceKind, String)>,
}

impl fmt::Debug for LoadableModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableModule")
            .field("name", &self.name)
            .field("refs", &self.refs())
            .field("provides", &self.provides)
            .finish()
    }
}

impl LoadableModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn provides(&self) -> &[(InterfaceKind, String)] {
        &self.provides
    }

    /// Read-lock the module; fails while it is being unloaded
    pub fn guard(self: &Arc<Self>) -> Option<ModuleGuard> {
        let lock = self.lock.clone().try_read_owned().ok()?;
        Some(ModuleGuard {
            module: self.clone(),
            _lock: lock,
        })
    }
}

/// Proof that a module is read-locked. The only way to reach an
/// [`InterfaceGuard`].
pub struct ModuleGuard {
    module: Arc<LoadableModule>,
    _lock: OwnedRwLockReadGuard<()>,
}

impl ModuleGuard {
    pub fn module(&self) -> &LoadableModule {
        &self.module
    }

    /// Read-lock `entry` and count one use on it and on this module
    pub fn protect<T: ?Sized>(self, entry: &Arc<InterfaceEntry<T>>) -> Option<InterfaceGuard<T>> {
        if !Arc::ptr_eq(&self.module, &entry.module) {
            return None;
        }
        let interface_lock = entry.lock.clone().try_read_owned().ok()?;
        entry.refs.fetch_add(1, Ordering::AcqRel);
        self.module.refs.fetch_add(1, Ordering::AcqRel);
        Some(InterfaceGuard {
            entry: entry.clone(),
            _interface_lock: interface_lock,
            _module: self,
        })
    }
}

/// One registered interface of kind `T`
pub struct InterfaceEntry<T: ?Sized> {
    name: String,
    module: Arc<LoadableModule>,
    lock: Arc<AsyncRwLock<()>>,
    refs: AtomicUsize,
    implementation: Arc<T>,
}

impl<T: ?Sized> InterfaceEntry<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_name(&self) -> &str {
        &self.module.name
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Module then interface, in that order
    pub fn protect(self: &Arc<Self>) -> Option<InterfaceGuard<T>> {
        self.module.guard()?.protect(self)
    }
}

/// A protected interface. Dereferences to the implementation; dropping it
/// decrements both use counts and releases the interface lock before the
/// module lock.
pub struct InterfaceGuard<T: ?Sized> {
    entry: Arc<InterfaceEntry<T>>,
    _interface_lock: OwnedRwLockReadGuard<()>,
    _module: ModuleGuard,
}

impl<T: ?Sized> InterfaceGuard<T> {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn module_name(&self) -> &str {
        self.entry.module_name()
    }

    /// A second use of the same interface
    pub fn try_clone(&self) -> Option<InterfaceGuard<T>> {
        self.entry.protect()
    }

    pub fn implementation(&self) -> Arc<T> {
        self.entry.implementation.clone()
    }
}

impl<T: ?Sized> Deref for InterfaceGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entry.implementation
    }
}

impl<T: ?Sized> Drop for InterfaceGuard<T> {
    fn drop(&mut self) {
        self.entry.refs.fetch_sub(1, Ordering::AcqRel);
        self.entry.module.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T: ?Sized> fmt::Debug for InterfaceGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceGuard")
            .field("name", &self.entry.name)
            .field("module", &self.entry.module.name)
            .finish()
    }
}

/// Name → interface map for one kind
pub struct InterfaceTable<T: ?Sized> {
    kind: InterfaceKind,
    entries: RwLock<IndexMap<String, Arc<InterfaceEntry<T>>>>,
}

impl<T: ?Sized> InterfaceTable<T> {
    fn new(kind: InterfaceKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(IndexMap::new()),
        }
    }

    fn insert(&self, module: &Arc<LoadableModule>, name: &str, implementation: Arc<T>) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            warn!(kind = %self.kind, name, module = %module.name, "Interface already registered, skipping");
            return false;
        }
        entries.insert(
            name.to_string(),
            Arc::new(InterfaceEntry {
                name: name.to_string(),
                module: module.clone(),
                lock: Arc::new(AsyncRwLock::new(())),
                refs: AtomicUsize::new(0),
                implementation,
            }),
        );
        true
    }

    fn remove_module(&self, module: &str) {
        self.entries.write().retain(|_, e| e.module.name != module);
    }

    /// Look up and protect by name; `None` when unknown or unloading
    pub fn get(&self, name: &str) -> Option<InterfaceGuard<T>> {
        let entry = self.entries.read().get(name).cloned()?;
        entry.protect()
    }

    /// Protect the first entry matching `pred`
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<InterfaceGuard<T>> {
        let entry = self
            .entries
            .read()
            .values()
            .find(|e| pred(&*e.implementation))
            .cloned()?;
        entry.protect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// All loaded modules and every interface they provide
pub struct ModuleRegistry {
    modules: RwLock<IndexMap<String, Arc<LoadableModule>>>,
    pub endpoints: InterfaceTable<dyn Endpoint>,
    pub codecs: InterfaceTable<dyn CodecInterface>,
    pub applications: InterfaceTable<dyn Application>,
    pub dialplans: InterfaceTable<dyn DialplanInterface>,
    pub timers: InterfaceTable<dyn TimerInterface>,
    pub files: InterfaceTable<dyn FileInterface>,
    pub asr: InterfaceTable<dyn AsrInterface>,
    pub speech: InterfaceTable<dyn SpeechInterface>,
    pub directories: InterfaceTable<dyn DirectoryInterface>,
    pub say: InterfaceTable<dyn SayInterface>,
    pub chat: InterfaceTable<dyn ChatInterface>,
    pub management: InterfaceTable<dyn ManagementInterface>,
    pub limits: InterfaceTable<dyn LimitInterface>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.module_names())
            .finish()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(IndexMap::new()),
            endpoints: InterfaceTable::new(InterfaceKind::Endpoint),
            codecs: InterfaceTable::new(InterfaceKind::Codec),
            applications: InterfaceTable::new(InterfaceKind::Application),
            dialplans: InterfaceTable::new(InterfaceKind::Dialplan),
            timers: InterfaceTable::new(InterfaceKind::Timer),
            files: InterfaceTable::new(InterfaceKind::File),
            asr: InterfaceTable::new(InterfaceKind::Asr),
            speech: InterfaceTable::new(InterfaceKind::Speech),
            directories: InterfaceTable::new(InterfaceKind::Directory),
            say: InterfaceTable::new(InterfaceKind::Say),
            chat: InterfaceTable::new(InterfaceKind::Chat),
            management: InterfaceTable::new(InterfaceKind::Management),
            limits: InterfaceTable::new(InterfaceKind::Limit),
        }
    }

    /// Load a module and register what it provides
    pub async fn load(&self, module: Arc<dyn Module>) -> Result<Arc<LoadableModule>> {
        let name = module.name().to_string();
        if self.modules.read().contains_key(&name) {
            return Err(SwitchError::module(&name, "already loaded"));
        }

        let mut interfaces = ModuleInterfaces::new();
        module.load(&mut interfaces).await?;

        let mut provides = Vec::new();
        macro_rules! collect {
            ($field:ident, $kind:expr) => {
                for iface in &interfaces.$field {
                    provides.push(($kind, iface.name().to_string()));
                }
            };
        }
        collect!(endpoints, InterfaceKind::Endpoint);
        collect!(codecs, InterfaceKind::Codec);
        collect!(applications, InterfaceKind::Application);
        collect!(dialplans, InterfaceKind::Dialplan);
        collect!(timers, InterfaceKind::Timer);
        collect!(files, InterfaceKind::File);
        collect!(asr, InterfaceKind::Asr);
        collect!(speech, InterfaceKind::Speech);
        collect!(directories, InterfaceKind::Directory);
        collect!(say, InterfaceKind::Say);
        collect!(chat, InterfaceKind::Chat);
        collect!(management, InterfaceKind::Management);
        collect!(limits, InterfaceKind::Limit);

        let loaded = Arc::new(LoadableModule {
            name: name.clone(),
            module,
            lock: Arc::new(AsyncRwLock::new(())),
            refs: AtomicUsize::new(0),
            provides,
        });

        {
            let mut modules = self.modules.write();
            if modules.contains_key(&name) {
                return Err(SwitchError::module(&name, "already loaded"));
            }
            modules.insert(name.clone(), loaded.clone());
        }

        macro_rules! register {
            ($field:ident) => {
                for iface in interfaces.$field.drain(..) {
                    let iface_name = iface.name().to_string();
                    self.$field.insert(&loaded, &iface_name, iface);
                }
            };
        }
        register!(endpoints);
        register!(codecs);
        register!(applications);
        register!(dialplans);
        register!(timers);
        register!(files);
        register!(asr);
        register!(speech);
        register!(directories);
        register!(say);
        register!(chat);
        register!(management);
        register!(limits);

        info!(module = %name, interfaces = loaded.provides.len(), "Module loaded");
        Ok(loaded)
    }

    /// Unload a module. Fails with `InUse` while any of its interfaces is
    /// protected and with `NoUnload` when the module refuses.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let module = self
            .modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SwitchError::not_found("module", name))?;

        if module.refs() > 0 {
            return Err(SwitchError::in_use(format!("module {} ({} refs)", name, module.refs())));
        }
        let _exclusive = module
            .lock
            .clone()
            .try_write_owned()
            .map_err(|_| SwitchError::in_use(format!("module {}", name)))?;

        match module.module.shutdown().await {
            Ok(()) => {}
            Err(SwitchError::NoUnload { .. }) => {
                return Err(SwitchError::NoUnload {
                    name: name.to_string(),
                })
            }
            Err(e) => {
                warn!(module = %name, error = %e, "Module shutdown reported an error, unloading anyway");
            }
        }

        self.endpoints.remove_module(name);
        self.codecs.remove_module(name);
        self.applications.remove_module(name);
        self.dialplans.remove_module(name);
        self.timers.remove_module(name);
        self.files.remove_module(name);
        self.asr.remove_module(name);
        self.speech.remove_module(name);
        self.directories.remove_module(name);
        self.say.remove_module(name);
        self.chat.remove_module(name);
        self.management.remove_module(name);
        self.limits.remove_module(name);
        self.modules.write().shift_remove(name);
        info!(module = %name, "Module unloaded");
        Ok(())
    }

    /// Unload everything in reverse load order, skipping refusals
    pub async fn unload_all(&self) {
        let names: Vec<String> = self.modules.read().keys().rev().cloned().collect();
        for name in names {
            if let Err(e) = self.unload(&name).await {
                debug!(module = %name, error = %e, "Module not unloaded");
            }
        }
    }

    pub fn module(&self, name: &str) -> Option<Arc<LoadableModule>> {
        self.modules.read().get(name).cloned()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    pub fn endpoint(&self, name: &str) -> Option<InterfaceGuard<dyn Endpoint>> {
        self.endpoints.get(name)
    }

    pub fn codec(&self, name: &str) -> Option<InterfaceGuard<dyn CodecInterface>> {
        self.codecs.get(name)
    }

    pub fn application(&self, name: &str) -> Option<InterfaceGuard<dyn Application>> {
        self.applications.get(name)
    }

    pub fn dialplan(&self, name: &str) -> Option<InterfaceGuard<dyn DialplanInterface>> {
        self.dialplans.get(name)
    }

    pub fn timer(&self, name: &str) -> Option<InterfaceGuard<dyn TimerInterface>> {
        self.timers.get(name)
    }

    /// File format by extension
    pub fn file_format(&self, extension: &str) -> Option<InterfaceGuard<dyn FileInterface>> {
        self.files
            .find(|f| f.extensions().iter().any(|e| e.eq_ignore_ascii_case(extension)))
    }

    pub fn asr(&self, name: &str) -> Option<InterfaceGuard<dyn AsrInterface>> {
        self.asr.get(name)
    }

    pub fn speech(&self, name: &str) -> Option<InterfaceGuard<dyn SpeechInterface>> {
        self.speech.get(name)
    }

    pub fn directory(&self, name: &str) -> Option<InterfaceGuard<dyn DirectoryInterface>> {
        self.directories.get(name)
    }

    pub fn say(&self, name: &str) -> Option<InterfaceGuard<dyn SayInterface>> {
        self.say.get(name)
    }

    pub fn chat(&self, name: &str) -> Option<InterfaceGuard<dyn ChatInterface>> {
        self.chat.get(name)
    }

    pub fn management(&self, name: &str) -> Option<InterfaceGuard<dyn ManagementInterface>> {
        self.management.get(name)
    }

    pub fn limit(&self, name: &str) -> Option<InterfaceGuard<dyn LimitInterface>> {
        self.limits.get(name)
    }

    /// Names registered for one kind, in registration order
    pub fn list(&self, kind: InterfaceKind) -> Vec<String> {
        match kind {
            InterfaceKind::Endpoint => self.endpoints.names(),
            InterfaceKind::Codec => self.codecs.names(),
            InterfaceKind::Application => self.applications.names(),
            InterfaceKind::Dialplan => self.dialplans.names(),
            InterfaceKind::Timer => self.timers.names(),
            InterfaceKind::File => self.files.names(),
            InterfaceKind::Asr => self.asr.names(),
            InterfaceKind::Speech => self.speech.names(),
            InterfaceKind::Directory => self.directories.names(),
            InterfaceKind::Say => self.say.names(),
            InterfaceKind::Chat => self.chat.names(),
            InterfaceKind::Management => self.management.names(),
            InterfaceKind::Limit => self.limits.names(),
        }
    }
}

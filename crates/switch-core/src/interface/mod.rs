//! Module capability interfaces and the registry that tracks them
//!
//! Each pluggable subsystem is a trait; a module hands `Arc<dyn Trait>`
//! implementations to the [`ModuleRegistry`] when it loads. Callers never hold
//! a bare implementation: lookups return an [`InterfaceGuard`] that keeps the
//! owning module from unloading until it is dropped.

mod application;
mod codec;
mod endpoint;
mod registry;
mod services;
mod timer;

pub use application::{Application, DialplanInterface};
pub use codec::{Codec, CodecImplementation, CodecInterface};
pub use endpoint::Endpoint;
pub use registry::{
    InterfaceEntry, InterfaceGuard, InterfaceKind, InterfaceTable, LoadableModule, Module,
    ModuleGuard, ModuleInterfaces, ModuleRegistry,
};
pub use services::{
    AsrInterface, ChatInterface, DirectoryInterface, FileHandle, FileInterface, LimitInterface,
    ManagementInterface, SayInterface, SpeechInterface,
};
pub use timer::{TimerHandle, TimerInterface};

#[cfg(test)]
mod tests;

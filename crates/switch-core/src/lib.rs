//! # Switch-Core
//!
//! The call-processing core of the RVOIP soft-switch.
//!
//! This crate provides:
//! - Session lifecycle: admission with session caps and a per-second
//!   throttle, uuid lookup under read locks, teardown that waits for readers
//! - The channel state machine, one driver task per session, running global
//!   and endpoint state handlers before the built-in behavior of each state
//! - Media bugs: ordered taps on a session's read and write streams
//! - Per-session message, event, private event, DTMF and application queues
//! - The module registry: endpoints, codecs, applications, dialplans, timers
//!   and the other capability interfaces, protected while in use
//! - [`CoreRuntime`]: process-wide state, the event bus and the control
//!   surface ([`CoreRuntime::ctl`])
//!
//! ## Quick start
//!
//! ```no_run
//! use rvoip_switch_core::{modules, CallerProfile, CoreConfig, CoreRuntime, OriginateFlags};
//!
//! # async fn run() -> rvoip_switch_core::Result<()> {
//! let runtime = CoreRuntime::new(CoreConfig::default());
//! runtime.start()?;
//! modules::load_builtin(&runtime).await?;
//!
//! let profile = CallerProfile::new("answer,sleep:1000,hangup").with_dialplan("inline");
//! let session = runtime.originate("loopback", profile, OriginateFlags::NONE).await?;
//! session.join().await?;
//!
//! runtime.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod errors;
pub mod event;
pub mod frame;
pub mod interface;
pub(crate) mod lock;
pub mod media_bug;
pub mod message;
pub mod modules;
pub mod pool;
pub mod queue;
pub mod runtime;
pub mod session;
pub mod state_machine;
pub mod types;

pub use channel::{CallerProfile, Channel, ChannelFlag, ChannelState, Extension, ExtensionApp};
pub use config::CoreConfig;
pub use errors::{Result, Status, SwitchError};
pub use event::{Event, EventBus, EventType};
pub use frame::Frame;
pub use interface::{InterfaceGuard, InterfaceKind, Module, ModuleInterfaces, ModuleRegistry};
pub use media_bug::{AbcType, BugFlags, MediaBug};
pub use message::{Message, MessageKind};
pub use runtime::{CoreRuntime, CtlResponse, PauseDirection, RuntimeFlag, SessionCtl, ShutdownMode};
pub use session::{Session, SessionManager};
pub use state_machine::{HandlerOutcome, Signal, StateHandler};
pub use types::{CallDirection, Dtmf, HangupCause, MediaType, OriginateFlags, PrivateSlot, SessionId};

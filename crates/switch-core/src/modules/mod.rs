//! Modules shipped with the core
//!
//! | module          | provides                                   |
//! |-----------------|--------------------------------------------|
//! | `core_codecs`   | codecs `L16`, `PCMU`, `PCMA`               |
//! | `core_timer`    | timer `soft`                               |
//! | `core_dialplan` | dialplans `inline`, `registry`             |
//! | `core_dptools`  | `answer`, `hangup`, `park`, `sleep`, ...   |
//! | `core_loopback` | endpoint `loopback`                        |

pub mod codecs;
pub mod dialplan;
pub mod dptools;
pub mod loopback;
pub mod timer;

use crate::errors::Result;
use crate::interface::Module;
use crate::runtime::CoreRuntime;
use std::sync::Arc;
use tracing::info;

/// Every built-in module, in load order
pub fn builtin_modules() -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(codecs::CodecModule),
        Arc::new(timer::TimerModule),
        Arc::new(dialplan::DialplanModule),
        Arc::new(dptools::DptoolsModule),
        Arc::new(loopback::LoopbackModule),
    ]
}

/// Load every built-in module into `runtime`
pub async fn load_builtin(runtime: &CoreRuntime) -> Result<()> {
    let modules = builtin_modules();
    let count = modules.len();
    for module in modules {
        runtime.load_module(module).await?;
    }
    info!(count, "Built-in modules loaded");
    Ok(())
}

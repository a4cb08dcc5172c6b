//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `serve`   | `Serve`, `Init`         |
//! | `user`    | `User`                  |
//! | `stats`   | `Stats`                 |
//! | `watch`   | `Watch`                 |
//! | `config`  | `Config`                |

pub mod config;
pub mod serve;
pub mod stats;
pub mod user;
pub mod watch;

pub use config::cmd_config;
pub use serve::{cmd_init, cmd_serve};
pub use stats::cmd_stats;
pub use user::cmd_user;
pub use watch::cmd_watch;

use anyhow::{Context, Result};
use lockdispatch::config::DispatchConfig;
use lockdispatch::dispatch::db::DispatchDb;

/// Open the configured database, creating its parent directory.
pub(crate) fn open_db(config: &DispatchConfig) -> Result<DispatchDb> {
    let path = &config.database.path;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    DispatchDb::new(path)
}

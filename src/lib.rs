//! Crate entry point for **expub**.
//!
//! expub publishes an exercise folder to GitHub: every configured branch
//! folder (by default `main/` and `solution/`) becomes the content of the
//! branch with the same name, committed through the git data API.
//!
//! The engine in [`sync`] only talks to the [`host::ObjectStore`] trait, so
//! it runs unchanged against GitHub or the in-memory store used for dry
//! runs and tests. The `pub use` re-exports are what the `expub` binary
//! calls into.

pub mod content;
pub mod error;
pub mod host;
mod instructions;
pub mod paths;
mod progress;
pub mod provision;
pub mod settings;
pub mod sync;

pub use error::ConfigError;
pub use instructions::cmd_instructions;
pub use provision::cmd_publish;
pub use settings::{Overrides, Settings, SyncMode, read_token};
pub use sync::cmd_sync;

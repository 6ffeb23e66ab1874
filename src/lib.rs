//! sconfig - config files whose passwords are sealed with a machine-bound key
//!
//! Fields named `<Name>Password` / `<Name>SecurePassword` form a pair. A
//! plaintext found in the `Password` field is encrypted into the
//! `SecurePassword` field and replaced on disk by a marker; on every load
//! the secret is decrypted back into the `Password` field in memory. The key
//! is derived from the host's hardware fingerprint and never stored, so a
//! sealed file only opens on the machine that sealed it.
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use sconfig::{ConfigRecord, FieldType, Locale, Schema, VaultContext, load_config};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct Config {
//!     version: i64,
//!     port: i64,
//!     db_password: String,
//!     db_secure_password: String,
//! }
//!
//! impl ConfigRecord for Config {
//!     fn schema() -> Schema {
//!         Schema::new().field("Port", FieldType::Integer, "8080")
//!     }
//! }
//!
//! # fn main() -> sconfig::Result<()> {
//! let ctx = VaultContext::from_system(Locale::from_env())?;
//! let mut config = Config::default();
//! load_config(&ctx, &mut config, 1, "config.json", false)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod context;
pub mod envfile;
pub mod error;
pub mod file_ops;
pub mod fingerprint;
pub mod keyderive;
pub mod loader;
pub mod placeholder;
pub mod probe;
pub mod schema;
pub mod secretcrypt;
pub mod walker;

pub use context::VaultContext;
pub use envfile::{EnvConfig, EnvFile};
pub use error::{ErrorCategory, ErrorKind, Result, SconfigError};
pub use fingerprint::{FixedHardwareId, FnHardwareId, HardwareIdSource, ProbeHardwareId};
pub use loader::{ConfigLoader, LoadOptions, LoadReport, load_config};
pub use placeholder::{Locale, Placeholders};
pub use schema::{ConfigRecord, FieldSpec, FieldType, Schema};
pub use walker::{StructWalker, VersionScope, WalkOptions};

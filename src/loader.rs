//! Structured (JSON) config loading
//!
//! One load call runs the whole lifecycle: read the file, apply declared
//! defaults, merge the file over the caller's record, seal new plaintext
//! secrets and reconcile the version, rewrite the file when anything
//! changed, then decrypt the secrets into the caller's record.

use crate::context::VaultContext;
use crate::error::{ErrorCategory, ErrorKind, Result, SconfigError};
use crate::file_ops;
use crate::schema::{ConfigRecord, DefaultMode};
use crate::walker::{StructWalker, VersionScope, WalkOptions};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Write the secrets back to disk in plaintext and always rewrite the
    /// file. Meant for migration and inspection only.
    pub clean_config: bool,
    pub version_scope: VersionScope,
    /// Reject secure fields without a plaintext sibling.
    pub strict_pairs: bool,
}

/// What a load call did to the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rewritten: bool,
}

pub struct ConfigLoader<'a> {
    ctx: &'a VaultContext,
    options: LoadOptions,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(ctx: &'a VaultContext) -> Self {
        Self {
            ctx,
            options: LoadOptions::default(),
        }
    }

    pub fn with_options(ctx: &'a VaultContext, options: LoadOptions) -> Self {
        Self { ctx, options }
    }

    /// Load `path` into `record`.
    ///
    /// On error the record may hold partially processed values and must not
    /// be trusted.
    pub fn load<T: ConfigRecord>(
        &self,
        record: &mut T,
        expected_version: i64,
        path: &Path,
    ) -> Result<LoadReport> {
        let walker = StructWalker::with_options(
            self.ctx,
            WalkOptions {
                version_scope: self.options.version_scope,
                strict_pairs: self.options.strict_pairs,
            },
        );

        let file_doc = match file_ops::read_config(path)? {
            Some(raw) => parse_document(&raw, path)?,
            None => Map::new(),
        };

        let schema = T::schema();
        let mut doc = to_document(record)?;
        schema
            .apply_defaults(&mut doc, DefaultMode::Overwrite)
            .map_err(|e| e.with_context("failed to apply default values"))?;
        merge(&mut doc, file_doc);
        schema
            .apply_defaults(&mut doc, DefaultMode::FillMissing)
            .map_err(|e| e.with_context("failed to apply default values"))?;

        *record = from_document(Value::Object(doc), path)?;

        // Round-trip through the record so the document has exactly the
        // record's fields, in declaration order.
        let mut doc = Value::Object(to_document(record)?);
        let mut changed = walker
            .seal(&mut doc, expected_version)
            .map_err(|e| e.with_context("failed to check passwords"))?;

        if self.options.clean_config {
            walker
                .open(&mut doc)
                .map_err(|e| e.with_context("failed to decode passwords"))?;
            changed = true;
        }

        if changed {
            let pretty = serde_json::to_string_pretty(&doc).map_err(|e| {
                SconfigError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::SerializationFailed,
                    "failed to build config JSON",
                    e,
                )
            })?;
            file_ops::write_config(path, pretty.as_bytes())
                .map_err(|e| e.with_context(format!("failed to write to {}", path.display())))?;
        }

        if !self.options.clean_config {
            walker
                .open(&mut doc)
                .map_err(|e| e.with_context("failed to decode passwords"))?;
        }

        *record = from_document(doc, path)?;
        Ok(LoadReport { rewritten: changed })
    }
}

/// Load `path` into `record` with default options.
pub fn load_config<T: ConfigRecord>(
    ctx: &VaultContext,
    record: &mut T,
    expected_version: i64,
    path: impl AsRef<Path>,
    clean_config: bool,
) -> Result<()> {
    let options = LoadOptions {
        clean_config,
        ..LoadOptions::default()
    };
    ConfigLoader::with_options(ctx, options)
        .load(record, expected_version, path.as_ref())
        .map(|_| ())
}

fn parse_document(raw: &str, path: &Path) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        SconfigError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::DeserializationFailed,
            format!("failed to parse {}: {}", path.display(), e),
            e,
        )
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(SconfigError::with_kind(
            ErrorCategory::User,
            ErrorKind::DeserializationFailed,
            format!("{} does not contain a JSON object", path.display()),
        )),
    }
}

fn to_document<T: ConfigRecord>(record: &T) -> Result<Map<String, Value>> {
    let value = serde_json::to_value(record).map_err(|e| {
        SconfigError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::SerializationFailed,
            "failed to serialize config record",
            e,
        )
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(SconfigError::with_kind(
            ErrorCategory::User,
            ErrorKind::NotARecord,
            "config must serialize to a record of named fields",
        )),
    }
}

fn from_document<T: ConfigRecord>(doc: Value, path: &Path) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| {
        SconfigError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::DeserializationFailed,
            format!("{} does not match the config shape: {}", path.display(), e),
            e,
        )
    })
}

/// Merge `overlay` into `base`: records merge key by key, everything else
/// in the overlay replaces the base value.
fn merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match value {
            Value::Object(incoming) => match base.get_mut(&key) {
                Some(Value::Object(existing)) => merge(existing, incoming),
                _ => {
                    base.insert(key, Value::Object(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

//! Password-pair traversal of config documents
//!
//! A record is a JSON object. Inside one record, a key ending in a secure
//! suffix (`SecurePassword` or `_secure_password`) pairs with the sibling
//! whose name swaps that suffix for the plaintext one (`Password` or
//! `_password`). Pairing never crosses record boundaries. Nested records and
//! record elements of sequences are visited recursively, in key order.
//!
//! Sealing replaces a fresh plaintext with the current marker and stores the
//! ciphertext in the secure sibling. Opening puts the decrypted secret back
//! into the plaintext field for in-memory use.

use crate::context::VaultContext;
use crate::error::{ErrorCategory, ErrorKind, Result, SconfigError};
use serde_json::{Map, Value};

/// `(secure suffix, plaintext suffix)`, matched case-sensitively.
const PAIR_SUFFIXES: &[(&str, &str)] = &[
    ("SecurePassword", "Password"),
    ("_secure_password", "_password"),
];

const VERSION_FIELDS: &[&str] = &["Version", "version"];

/// Which records have their version field reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionScope {
    /// Only the root record.
    #[default]
    TopLevel,
    /// Every record at any depth, all against the same expected version.
    Everywhere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkOptions {
    pub version_scope: VersionScope,
    /// Fail on a secure field whose plaintext sibling is missing or not a string.
    pub strict_pairs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Seal,
    Open,
}

pub struct StructWalker<'a> {
    ctx: &'a VaultContext,
    options: WalkOptions,
}

/// Plaintext sibling of `key` if `key` carries a secure suffix.
pub fn plaintext_sibling(key: &str) -> Option<String> {
    PAIR_SUFFIXES.iter().find_map(|(secure, plain)| {
        key.strip_suffix(secure)
            .map(|prefix| format!("{}{}", prefix, plain))
    })
}

impl<'a> StructWalker<'a> {
    pub fn new(ctx: &'a VaultContext) -> Self {
        Self {
            ctx,
            options: WalkOptions::default(),
        }
    }

    pub fn with_options(ctx: &'a VaultContext, options: WalkOptions) -> Self {
        Self { ctx, options }
    }

    /// Seal new plaintext secrets and reconcile versions.
    ///
    /// Returns whether anything changed, i.e. whether the persisted file must
    /// be rewritten.
    pub fn seal(&self, root: &mut Value, expected_version: i64) -> Result<bool> {
        let mut changed = false;
        self.walk_value(root, "", 0, Mode::Seal, expected_version, &mut changed)?;
        Ok(changed)
    }

    /// Decrypt every sealed secret into its plaintext sibling. Stops at the
    /// first value that does not open.
    pub fn open(&self, root: &mut Value) -> Result<()> {
        let mut changed = false;
        self.walk_value(root, "", 0, Mode::Open, 0, &mut changed)
    }

    fn walk_value(
        &self,
        value: &mut Value,
        path: &str,
        depth: usize,
        mode: Mode,
        expected_version: i64,
        changed: &mut bool,
    ) -> Result<()> {
        match value {
            Value::Object(record) => {
                self.walk_record(record, path, depth, mode, expected_version, changed)
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    if item.is_object() {
                        let item_path = format!("{}[{}]", path, i);
                        self.walk_value(
                            item,
                            &item_path,
                            depth + 1,
                            mode,
                            expected_version,
                            changed,
                        )?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn walk_record(
        &self,
        record: &mut Map<String, Value>,
        path: &str,
        depth: usize,
        mode: Mode,
        expected_version: i64,
        changed: &mut bool,
    ) -> Result<()> {
        let keys: Vec<String> = record.keys().cloned().collect();
        for key in keys {
            let field_path = join_path(path, &key);

            if let Some(child) = record.get_mut(&key) {
                if child.is_object() || child.is_array() {
                    self.walk_value(
                        child,
                        &field_path,
                        depth + 1,
                        mode,
                        expected_version,
                        changed,
                    )?;
                    continue;
                }
            }

            if mode == Mode::Seal && VERSION_FIELDS.contains(&key.as_str()) {
                let eligible =
                    depth == 0 || self.options.version_scope == VersionScope::Everywhere;
                if eligible {
                    self.reconcile_version(record, &key, &field_path, expected_version, changed);
                }
                continue;
            }

            let Some(sibling) = plaintext_sibling(&key) else {
                continue;
            };
            let pair_ok = matches!(record.get(&key), Some(Value::String(_)))
                && matches!(record.get(&sibling), Some(Value::String(_)));
            if !pair_ok {
                self.orphaned(&field_path, &sibling)?;
                continue;
            }

            match mode {
                Mode::Seal => {
                    if self.seal_pair(record, &key, &sibling, &field_path)? {
                        *changed = true;
                    }
                }
                Mode::Open => self.open_pair(record, &key, &sibling, &field_path)?,
            }
        }
        Ok(())
    }

    fn reconcile_version(
        &self,
        record: &mut Map<String, Value>,
        key: &str,
        field_path: &str,
        expected_version: i64,
        changed: &mut bool,
    ) {
        let Some(Value::Number(current)) = record.get(key) else {
            return;
        };
        if current.as_i64() == Some(expected_version) {
            return;
        }
        tracing::debug!(
            field = field_path,
            from = %current,
            to = expected_version,
            "updating version"
        );
        record.insert(key.to_string(), Value::Number(expected_version.into()));
        *changed = true;
    }

    fn seal_pair(
        &self,
        record: &mut Map<String, Value>,
        key: &str,
        sibling: &str,
        field_path: &str,
    ) -> Result<bool> {
        let plaintext = match record.get(sibling) {
            Some(Value::String(s)) => s.as_str(),
            _ => return Ok(false),
        };
        let placeholders = self.ctx.placeholders();
        if plaintext.is_empty() || placeholders.is_secure_marker(plaintext) {
            return Ok(false);
        }

        let sealed = self
            .ctx
            .seal(plaintext)
            .map_err(|e| e.with_context(format!("failed to seal {}", field_path)))?;
        record.insert(key.to_string(), Value::String(sealed));
        record.insert(
            sibling.to_string(),
            Value::String(placeholders.current_marker().to_string()),
        );
        tracing::debug!(field = field_path, "sealed new plaintext secret");
        Ok(true)
    }

    fn open_pair(
        &self,
        record: &mut Map<String, Value>,
        key: &str,
        sibling: &str,
        field_path: &str,
    ) -> Result<()> {
        let sealed = match record.get(key) {
            Some(Value::String(s)) if !s.is_empty() => s.as_str(),
            _ => return Ok(()),
        };
        let plaintext = self
            .ctx
            .open(sealed)
            .map_err(|e| e.with_context(format!("failed to decrypt {}", field_path)))?;
        record.insert(sibling.to_string(), Value::String(plaintext));
        Ok(())
    }

    fn orphaned(&self, field_path: &str, sibling: &str) -> Result<()> {
        if self.options.strict_pairs {
            return Err(SconfigError::with_kind(
                ErrorCategory::User,
                ErrorKind::OrphanedSecureField,
                format!("{} has no string sibling named {}", field_path, sibling),
            ));
        }
        tracing::warn!(
            field = field_path,
            sibling,
            "skipping secure field without plaintext sibling"
        );
        Ok(())
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::Locale;
    use serde_json::json;

    const MARKER: &str = "enter new password here";

    fn ctx() -> VaultContext {
        VaultContext::from_hardware_id(4242, Locale::English)
    }

    #[test]
    fn test_sibling_names() {
        assert_eq!(plaintext_sibling("DBSecurePassword").as_deref(), Some("DBPassword"));
        assert_eq!(
            plaintext_sibling("db_secure_password").as_deref(),
            Some("db_password")
        );
        assert_eq!(plaintext_sibling("SecurePassword").as_deref(), Some("Password"));
        assert_eq!(plaintext_sibling("DBPassword"), None);
        assert_eq!(plaintext_sibling("APISecureKey"), None);
        assert_eq!(plaintext_sibling("dbsecurepassword"), None);
    }

    #[test]
    fn test_seal_then_open() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let mut doc = json!({"Version": 0, "DBPassword": "s3cret", "DBSecurePassword": ""});

        assert!(walker.seal(&mut doc, 1).unwrap());
        assert_eq!(doc["Version"], json!(1));
        assert_eq!(doc["DBPassword"], json!(MARKER));
        let sealed = doc["DBSecurePassword"].as_str().unwrap().to_string();
        assert!(!sealed.is_empty());

        walker.open(&mut doc).unwrap();
        assert_eq!(doc["DBPassword"], json!("s3cret"));
        assert_eq!(doc["DBSecurePassword"], json!(sealed));
    }

    #[test]
    fn test_marker_is_idempotent() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let mut doc = json!({"DBPassword": "s3cret", "DBSecurePassword": ""});
        walker.seal(&mut doc, 0).unwrap();
        let sealed = doc["DBSecurePassword"].clone();

        assert!(!walker.seal(&mut doc, 0).unwrap());
        assert_eq!(doc["DBSecurePassword"], sealed);
    }

    #[test]
    fn test_german_marker_recognized() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let sealed = ctx.seal("alt").unwrap();
        let mut doc = json!({
            "DBPassword": "hier neues Passwort eingeben",
            "DBSecurePassword": sealed,
        });

        assert!(!walker.seal(&mut doc, 0).unwrap());
        walker.open(&mut doc).unwrap();
        assert_eq!(doc["DBPassword"], json!("alt"));
    }

    #[test]
    fn test_empty_plaintext_untouched() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let mut doc = json!({"DBPassword": "", "DBSecurePassword": ""});

        assert!(!walker.seal(&mut doc, 0).unwrap());
        walker.open(&mut doc).unwrap();
        assert_eq!(doc, json!({"DBPassword": "", "DBSecurePassword": ""}));
    }

    #[test]
    fn test_nested_and_sequences() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let mut doc = json!({
            "main": {"db_password": "one", "db_secure_password": ""},
            "servers": [
                {"db_password": "two", "db_secure_password": ""},
                "not a record",
                {"db_password": "three", "db_secure_password": ""}
            ]
        });

        assert!(walker.seal(&mut doc, 0).unwrap());
        assert_eq!(doc["main"]["db_password"], json!(MARKER));
        assert_eq!(doc["servers"][0]["db_password"], json!(MARKER));
        assert_eq!(doc["servers"][1], json!("not a record"));
        assert_eq!(doc["servers"][2]["db_password"], json!(MARKER));

        walker.open(&mut doc).unwrap();
        assert_eq!(doc["main"]["db_password"], json!("one"));
        assert_eq!(doc["servers"][0]["db_password"], json!("two"));
        assert_eq!(doc["servers"][2]["db_password"], json!("three"));
    }

    #[test]
    fn test_pairs_do_not_cross_levels() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let mut doc = json!({
            "DBSecurePassword": "",
            "inner": {"DBPassword": "s3cret"}
        });

        assert!(!walker.seal(&mut doc, 0).unwrap());
        assert_eq!(doc["inner"]["DBPassword"], json!("s3cret"));
    }

    #[test]
    fn test_orphan_lenient_and_strict() {
        let ctx = ctx();
        let mut doc = json!({"DBSecurePassword": ""});
        assert!(!StructWalker::new(&ctx).seal(&mut doc, 0).unwrap());

        let strict = StructWalker::with_options(
            &ctx,
            WalkOptions {
                strict_pairs: true,
                ..WalkOptions::default()
            },
        );
        let err = strict.seal(&mut doc, 0).expect_err("expected orphan error");
        assert_eq!(err.kind, Some(ErrorKind::OrphanedSecureField));
        assert!(err.to_string().contains("DBSecurePassword"));
    }

    #[test]
    fn test_non_string_pair_skipped() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let mut doc = json!({"DBPassword": 5, "DBSecurePassword": ""});
        assert!(!walker.seal(&mut doc, 0).unwrap());
        assert_eq!(doc["DBPassword"], json!(5));
    }

    #[test]
    fn test_version_scope() {
        let ctx = ctx();
        let doc = json!({"Version": 1, "sub": {"Version": 1}});

        let mut top = doc.clone();
        assert!(StructWalker::new(&ctx).seal(&mut top, 2).unwrap());
        assert_eq!(top["Version"], json!(2));
        assert_eq!(top["sub"]["Version"], json!(1));

        let mut everywhere = doc;
        let walker = StructWalker::with_options(
            &ctx,
            WalkOptions {
                version_scope: VersionScope::Everywhere,
                ..WalkOptions::default()
            },
        );
        assert!(walker.seal(&mut everywhere, 2).unwrap());
        assert_eq!(everywhere["sub"]["Version"], json!(2));
    }

    #[test]
    fn test_same_version_no_change() {
        let ctx = ctx();
        let mut doc = json!({"version": 3, "name": "x"});
        assert!(!StructWalker::new(&ctx).seal(&mut doc, 3).unwrap());
    }

    #[test]
    fn test_open_fails_fast() {
        let ctx = ctx();
        let walker = StructWalker::new(&ctx);
        let mut doc = json!({
            "servers": [
                {"DBPassword": MARKER, "DBSecurePassword": "garbage"}
            ]
        });

        let err = walker.open(&mut doc).expect_err("expected decryption error");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailed));
        assert!(err.to_string().contains("servers[0].DBSecurePassword"));
    }

    #[test]
    fn test_open_with_other_key_fails() {
        let sealed = VaultContext::from_hardware_id(1, Locale::English)
            .seal("s3cret")
            .unwrap();
        let other = VaultContext::from_hardware_id(2, Locale::English);
        let mut doc = json!({"DBPassword": MARKER, "DBSecurePassword": sealed});

        let err = StructWalker::new(&other)
            .open(&mut doc)
            .expect_err("expected cross-host failure");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailed));
    }
}

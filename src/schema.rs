//! Declared defaults for config records
//!
//! A record type describes its defaults as data through [`ConfigRecord::schema`].
//! Defaults are given as strings and coerced to the declared field type when
//! they are applied to the record's JSON document.

use crate::error::{ErrorCategory, ErrorKind, Result, SconfigError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

/// A record the loader can fill, seal and decrypt.
///
/// Only records without declared defaults can rely on the provided
/// `schema()`.
pub trait ConfigRecord: Serialize + DeserializeOwned {
    fn schema() -> Schema {
        Schema::new()
    }
}

impl ConfigRecord for Value {}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    Float,
    Record(Schema),
    Sequence(Schema),
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Float => "float",
            FieldType::Record(_) => "record",
            FieldType::Sequence(_) => "sequence",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

/// How defaults treat values already present in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultMode {
    /// Declared defaults replace whatever the caller put in the record.
    Overwrite,
    /// Declared defaults only fill keys the document lacks.
    FillMissing,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a scalar field with a default.
    pub fn field(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        default: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            default: Some(default.into()),
        });
        self
    }

    /// Declare a nested record whose own fields carry defaults.
    pub fn record(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty: FieldType::Record(schema),
            default: None,
        });
        self
    }

    /// Declare a sequence of records whose elements carry defaults.
    pub fn sequence(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty: FieldType::Sequence(schema),
            default: None,
        });
        self
    }

    /// Push a fully specified field.
    pub fn push(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Apply the declared defaults to `record`, recursing into nested records
    /// and into every record element of sequences.
    pub fn apply_defaults(&self, record: &mut Map<String, Value>, mode: DefaultMode) -> Result<()> {
        for spec in &self.fields {
            match &spec.ty {
                FieldType::Record(_) | FieldType::Sequence(_) if spec.default.is_some() => {
                    return Err(SconfigError::with_kind(
                        ErrorCategory::User,
                        ErrorKind::UnsupportedFieldType,
                        format!(
                            "default value on field {} of type {} is not supported",
                            spec.name,
                            spec.ty.name()
                        ),
                    ));
                }
                FieldType::Record(nested) => {
                    let entry = record
                        .entry(spec.name.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(map) = entry {
                        nested
                            .apply_defaults(map, mode)
                            .map_err(|e| e.with_context(format!("in record {}", spec.name)))?;
                    }
                }
                FieldType::Sequence(element) => {
                    if let Some(Value::Array(items)) = record.get_mut(&spec.name) {
                        for (i, item) in items.iter_mut().enumerate() {
                            if let Value::Object(map) = item {
                                element.apply_defaults(map, mode).map_err(|e| {
                                    e.with_context(format!("in {}[{}]", spec.name, i))
                                })?;
                            }
                        }
                    }
                }
                _ => {
                    let Some(default) = &spec.default else {
                        continue;
                    };
                    if mode == DefaultMode::FillMissing && record.contains_key(&spec.name) {
                        continue;
                    }
                    let value = coerce(&spec.name, &spec.ty, default)?;
                    record.insert(spec.name.clone(), value);
                }
            }
        }
        Ok(())
    }
}

/// Convert a textual default to a JSON value of the declared type.
pub fn coerce(field: &str, ty: &FieldType, raw: &str) -> Result<Value> {
    let invalid = |detail: String| {
        SconfigError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidDefault,
            format!(
                "default value {:?} of field {} is not a valid {}: {}",
                raw,
                field,
                ty.name(),
                detail
            ),
        )
    };

    match ty {
        FieldType::Text => Ok(Value::String(raw.to_string())),
        FieldType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|e| invalid(e.to_string())),
        FieldType::Boolean => parse_bool(raw.trim())
            .map(Value::Bool)
            .ok_or_else(|| invalid("expected true or false".to_string())),
        FieldType::Float => {
            let f = raw
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid(e.to_string()))?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| invalid("not a finite number".to_string()))
        }
        FieldType::Record(_) | FieldType::Sequence(_) => Err(SconfigError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsupportedFieldType,
            format!(
                "default value on field {} of type {} is not supported",
                field,
                ty.name()
            ),
        )),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

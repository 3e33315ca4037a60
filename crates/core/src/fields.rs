//! Semantic field model.
//!
//! A subrecord kind declares its shape as a list of [`FieldSpec`]s. Each
//! field has a [`FieldKind`] governing how payload values are validated,
//! stored and serialised. Reference-or-free-text fields
//! ([`FieldKind::CodedText`]) are backed by two physical storage attributes,
//! `<name>_fk` (lookup entry reference) and `<name>_ft` (free text), with a
//! single logical name exposed to clients.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rand::Rng;
use serde_json::Value;
use ward_types::ApiName;

use crate::error::{RecordError, RecordResult};
use crate::ids::EntryId;

/// Suffix of the lookup-entry-reference half of a coded field.
pub const FK_SUFFIX: &str = "_fk";
/// Suffix of the free-text half of a coded field.
pub const FT_SUFFIX: &str = "_ft";

/// Canonical textual form of date fields.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// FIELD KINDS
// ============================================================================

/// The declared semantic type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    DateTime,
    Boolean,
    Integer,
    /// Reference to another entity (owner links, audit actor links).
    Reference,
    /// Reference-or-free-text against the named controlled vocabulary.
    CodedText(ApiName),
    /// Many-valued reference against the named controlled vocabulary.
    ManyToMany(ApiName),
}

impl FieldKind {
    /// The client-facing semantic type name.
    ///
    /// This is an explicit mapping table, not runtime inference: coded fields
    /// read and write as text, so they report `"string"` with the lookup list
    /// attached separately by the schema reflector.
    pub fn schema_type(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::CodedText(_) => "string",
            FieldKind::Date => "date",
            FieldKind::DateTime => "date_time",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Reference => "reference",
            FieldKind::ManyToMany(_) => "list",
        }
    }

    /// The lookup list backing this field, if any.
    pub fn lookup_list(&self) -> Option<&ApiName> {
        match self {
            FieldKind::CodedText(list) | FieldKind::ManyToMany(list) => Some(list),
            _ => None,
        }
    }
}

/// One declared field of a subrecord kind.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Marks personally-identifying fields, excluded from de-identified
    /// extraction but still serialised normally.
    pub pid: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            pid: false,
        }
    }

    /// Marks this field as personally identifying.
    pub fn pid(mut self) -> Self {
        self.pid = true;
        self
    }
}

// ============================================================================
// STORED VALUES
// ============================================================================

/// A typed stored field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Bool(bool),
    Int(i64),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Ref(u64),
}

impl FieldValue {
    /// Converts the stored value to its JSON payload form.
    ///
    /// Dates use `YYYY-MM-DD`, datetimes RFC 3339.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::DateTime(dt) => {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            FieldValue::Ref(id) => Value::from(*id),
        }
    }

    /// Validates and converts a payload value against the declared kind.
    ///
    /// Coded and many-valued fields are handled by the codec, not here.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::InvalidDate`], [`RecordError::InvalidDateTime`]
    /// or [`RecordError::InvalidValue`] when the payload value does not match
    /// the declared kind.
    pub fn from_json(kind: &FieldKind, field: &str, value: &Value) -> RecordResult<Self> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        match kind {
            FieldKind::Text | FieldKind::CodedText(_) => match value.as_str() {
                Some(s) => Ok(FieldValue::Text(s.to_owned())),
                None => Err(invalid(field, "string")),
            },
            FieldKind::Boolean => match value.as_bool() {
                Some(b) => Ok(FieldValue::Bool(b)),
                None => Err(invalid(field, "boolean")),
            },
            FieldKind::Integer => match value.as_i64() {
                Some(i) => Ok(FieldValue::Int(i)),
                None => Err(invalid(field, "integer")),
            },
            FieldKind::Reference => match value.as_u64() {
                Some(id) => Ok(FieldValue::Ref(id)),
                None => Err(invalid(field, "reference id")),
            },
            FieldKind::Date => {
                let raw = value.as_str().ok_or_else(|| invalid(field, "date string"))?;
                let parsed = NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| {
                    RecordError::InvalidDate {
                        field: field.to_owned(),
                        value: raw.to_owned(),
                    }
                })?;
                Ok(FieldValue::Date(parsed))
            }
            FieldKind::DateTime => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| invalid(field, "datetime string"))?;
                let parsed = DateTime::parse_from_rfc3339(raw).map_err(|_| {
                    RecordError::InvalidDateTime {
                        field: field.to_owned(),
                        value: raw.to_owned(),
                    }
                })?;
                Ok(FieldValue::DateTime(parsed.with_timezone(&Utc)))
            }
            FieldKind::ManyToMany(_) => Err(invalid(field, "list handled by codec")),
        }
    }
}

fn invalid(field: &str, expected: &'static str) -> RecordError {
    RecordError::InvalidValue {
        field: field.to_owned(),
        expected,
    }
}

/// The value of a reference-or-free-text field: either a resolved
/// controlled-vocabulary entry or arbitrary text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodedValue {
    Resolved(EntryId),
    FreeText(String),
}

// ============================================================================
// CONSISTENCY TOKEN
// ============================================================================

/// Opaque 8-hex-digit version marker, regenerated on every successful
/// mutation. Optimistic concurrency control compares tokens, never contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyToken(String);

impl ConsistencyToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        Self(format!("{:08x}", rand::thread_rng().gen::<u32>()))
    }

    /// Wraps an externally supplied token value.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConsistencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_eight_hex_digits() {
        let token = ConsistencyToken::generate();
        assert_eq!(token.as_str().len(), 8);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_date_round_trips_through_canonical_form() {
        let value = FieldValue::from_json(
            &FieldKind::Date,
            "date_of_admission",
            &Value::String("2024-03-09".into()),
        )
        .expect("canonical date should parse");
        assert_eq!(value.to_json(), Value::String("2024-03-09".into()));
    }

    #[test]
    fn test_bad_date_is_rejected_with_field_name() {
        let err = FieldValue::from_json(
            &FieldKind::Date,
            "date_of_admission",
            &Value::String("09/03/2024".into()),
        )
        .expect_err("non-canonical date should be rejected");
        assert!(matches!(
            err,
            RecordError::InvalidDate { ref field, .. } if field == "date_of_admission"
        ));
    }

    #[test]
    fn test_datetime_parses_rfc3339() {
        let value = FieldValue::from_json(
            &FieldKind::DateTime,
            "updated",
            &Value::String("2024-03-09T10:30:00Z".into()),
        )
        .expect("RFC 3339 datetime should parse");
        assert!(matches!(value, FieldValue::DateTime(_)));
    }

    #[test]
    fn test_null_is_accepted_for_any_kind() {
        let value = FieldValue::from_json(&FieldKind::Boolean, "provisional", &Value::Null)
            .expect("null should be accepted");
        assert_eq!(value, FieldValue::Null);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = FieldValue::from_json(&FieldKind::Boolean, "provisional", &Value::from(1))
            .expect_err("integer should not satisfy a boolean field");
        assert!(matches!(err, RecordError::InvalidValue { .. }));
    }

    #[test]
    fn test_schema_type_mapping_table() {
        let list = ApiName::new("condition").unwrap();
        assert_eq!(FieldKind::Text.schema_type(), "string");
        assert_eq!(FieldKind::Date.schema_type(), "date");
        assert_eq!(FieldKind::DateTime.schema_type(), "date_time");
        assert_eq!(FieldKind::Boolean.schema_type(), "boolean");
        assert_eq!(FieldKind::CodedText(list.clone()).schema_type(), "string");
        assert_eq!(FieldKind::ManyToMany(list).schema_type(), "list");
    }
}

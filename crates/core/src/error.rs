//! Error taxonomy for the record synchronisation engine.
//!
//! Every fallible operation in this crate returns [`RecordResult`]. The
//! variants fall into two groups: client-triggered rejections (stale tokens,
//! unknown payload keys, unresolvable lookup values) and internal
//! inconsistencies ([`RecordError::Schema`], [`RecordError::CorruptArchive`])
//! which always indicate a programming or data-integrity bug rather than bad
//! user input.

use ward_types::ApiName;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A persisted record was updated without presenting its token.
    #[error("missing field (consistency_token)")]
    MissingConsistencyToken,
    /// The presented token does not match the record's current token. This is
    /// the canonical optimistic-lock conflict signal: the caller must re-fetch
    /// and retry.
    #[error("consistency token mismatch")]
    ConsistencyMismatch,
    /// The payload named fields the schema does not recognise.
    #[error("unexpected fieldname(s): {}", .0.join(", "))]
    UnknownFields(Vec<String>),
    /// Many-valued-reference resolution could not account for these values.
    #[error("unexpected lookup value(s): {}", .0.join(", "))]
    UnknownValues(Vec<String>),
    /// Internal reflection inconsistency. Never user-triggered: a statically
    /// declared field failed to resolve, which signals a registration bug.
    #[error("unexpected fieldname: {0}")]
    Schema(String),
    /// An archived record snapshot had an unexpected shape.
    #[error("corrupt archive entry: {0}")]
    CorruptArchive(String),

    #[error("no such team: {0}")]
    UnknownTeam(String),
    #[error("no such patient: {0}")]
    NoSuchPatient(u64),
    #[error("no such episode: {0}")]
    NoSuchEpisode(u64),
    #[error("no such record: {0}")]
    NoSuchRecord(u64),
    #[error("invalid date value for {field}: {value:?}")]
    InvalidDate { field: String, value: String },
    #[error("invalid datetime value for {field}: {value:?}")]
    InvalidDateTime { field: String, value: String },
    #[error("invalid value for {field}: expected {expected}")]
    InvalidValue {
        field: String,
        expected: &'static str,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("subrecord kind already registered: {0}")]
    DuplicateKind(ApiName),
    #[error("synonym {name:?} already exists for lookup list {list}")]
    DuplicateSynonym { list: ApiName, name: String },
}

pub type RecordResult<T> = std::result::Result<T, RecordError>;

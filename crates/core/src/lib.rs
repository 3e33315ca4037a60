//! # Ward Core
//!
//! Core engine for synchronising clinical records between a client and a
//! canonical store. The engine is generic over the concrete record types:
//! applications register subrecord kinds, lookup lists and teams at start-up,
//! and the engine provides
//!
//! - schema reflection for client-side form and validation generation,
//! - a record codec with optimistic-concurrency tokens and whole-payload
//!   validation,
//! - coded-value resolution against controlled vocabularies with synonym
//!   support and free-text fallback,
//! - aggregate composition (patient and episode payloads with nested
//!   subrecord lists),
//! - episode tag reconciliation, including historic tag reconstruction from
//!   the deleted-record archive.
//!
//! **No API concerns**: authentication, HTTP transports and session handling
//! belong to the embedding application.

pub mod access;
pub mod aggregate;
pub mod archive;
pub mod codec;
pub mod config;
pub mod error;
pub mod fields;
pub mod ids;
pub mod lookup;
pub mod record;
pub mod registry;
pub mod schema;
pub mod store;
pub mod tagging;
pub mod teams;

pub use access::{Actor, PluginRegistry, PolicyPlugin, UserProfile};
pub use aggregate::{AggregateService, Episode, Patient};
pub use archive::{ArchivedSnapshot, DeletedRecordArchive};
pub use codec::RecordCodec;
pub use config::CoreConfig;
pub use error::{RecordError, RecordResult};
pub use fields::{ConsistencyToken, FieldKind, FieldSpec, FieldValue};
pub use lookup::{LookupList, LookupRegistry};
pub use record::Record;
pub use registry::{FieldHandlers, Payload, SubrecordKind, SubrecordRegistry};
pub use schema::{RootFamily, SubrecordSchema};
pub use store::MemoryStore;
pub use tagging::Tagging;
pub use teams::{Team, TeamDirectory};

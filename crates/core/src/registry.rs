//! The subrecord kind catalog.
//!
//! The set of concrete subrecord types is open: downstream applications
//! register each kind's API name, schema, singleton flag and field handlers
//! into a process-wide [`SubrecordRegistry`] at start-up. The engine only
//! ever consults the registry; it never enumerates concrete types.
//!
//! Per-field behaviour overrides are typed handler maps populated once per
//! kind at registration time, replacing duck-typed method lookup. The audit
//! fields (`created`, `created_by_id`, `updated`, `updated_by_id`) are
//! installed as default setters on every kind, so they participate in the
//! same update pipeline as domain fields rather than as special-cased code
//! paths.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use ward_types::ApiName;

use crate::access::Actor;
use crate::error::{RecordError, RecordResult};
use crate::fields::{FieldSpec, FieldValue};
use crate::record::Record;
use crate::schema::{RootFamily, SubrecordSchema};

/// A client payload: field name to JSON-compatible value.
pub type Payload = serde_json::Map<String, Value>;

/// Custom read override: `get(record, actor)`.
pub type Getter = Box<dyn Fn(&Record, &Actor) -> RecordResult<Value> + Send + Sync>;

/// Custom write override: `set(record, value, actor, payload)`. The setter is
/// solely responsible for applying the (possibly absent) raw value.
pub type Setter =
    Box<dyn Fn(&mut Record, Option<&Value>, &Actor, &Payload) -> RecordResult<()> + Send + Sync>;

/// Per-field behaviour overrides for one subrecord kind.
#[derive(Default)]
pub struct FieldHandlers {
    getters: HashMap<String, Getter>,
    setters: HashMap<String, Setter>,
}

impl FieldHandlers {
    /// Handlers with the audit-field setters installed.
    ///
    /// `created`/`created_by_id` only apply on first persist;
    /// `updated`/`updated_by_id` only on subsequent persists. A record
    /// created outside the update pipeline therefore carries no audit trail,
    /// matching the original behaviour.
    pub fn with_tracked_fields() -> Self {
        let mut handlers = Self::default();
        handlers.insert_setter(
            "created",
            Box::new(|record, _value, _actor, _payload| {
                if !record.is_persisted() {
                    record.set_value("created", FieldValue::DateTime(Utc::now()));
                }
                Ok(())
            }),
        );
        handlers.insert_setter(
            "created_by_id",
            Box::new(|record, _value, actor, _payload| {
                if !record.is_persisted() {
                    record.set_value("created_by_id", FieldValue::Ref(actor.id.value()));
                }
                Ok(())
            }),
        );
        handlers.insert_setter(
            "updated",
            Box::new(|record, _value, _actor, _payload| {
                if record.is_persisted() {
                    record.set_value("updated", FieldValue::DateTime(Utc::now()));
                }
                Ok(())
            }),
        );
        handlers.insert_setter(
            "updated_by_id",
            Box::new(|record, _value, actor, _payload| {
                if record.is_persisted() {
                    record.set_value("updated_by_id", FieldValue::Ref(actor.id.value()));
                }
                Ok(())
            }),
        );
        handlers
    }

    pub fn insert_getter(&mut self, field: impl Into<String>, getter: Getter) {
        self.getters.insert(field.into(), getter);
    }

    pub fn insert_setter(&mut self, field: impl Into<String>, setter: Setter) {
        self.setters.insert(field.into(), setter);
    }

    pub fn getter(&self, field: &str) -> Option<&Getter> {
        self.getters.get(field)
    }

    pub fn setter(&self, field: &str) -> Option<&Setter> {
        self.setters.get(field)
    }
}

/// One registered subrecord kind: a named, versionable record shape attached
/// to one aggregate root family.
pub struct SubrecordKind {
    api_name: ApiName,
    display_name: String,
    family: RootFamily,
    singleton: bool,
    schema: SubrecordSchema,
    handlers: FieldHandlers,
}

impl SubrecordKind {
    pub fn new(
        api_name: ApiName,
        display_name: impl Into<String>,
        family: RootFamily,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            api_name,
            display_name: display_name.into(),
            family,
            singleton: false,
            schema: SubrecordSchema::new(family, fields),
            handlers: FieldHandlers::with_tracked_fields(),
        }
    }

    /// Declares exactly one instance per owning aggregate, created when the
    /// aggregate is first persisted.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn with_getter(mut self, field: impl Into<String>, getter: Getter) -> Self {
        self.handlers.insert_getter(field, getter);
        self
    }

    pub fn with_setter(mut self, field: impl Into<String>, setter: Setter) -> Self {
        self.handlers.insert_setter(field, setter);
        self
    }

    pub fn api_name(&self) -> &ApiName {
        &self.api_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn family(&self) -> RootFamily {
        self.family
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn schema(&self) -> &SubrecordSchema {
        &self.schema
    }

    pub fn handlers(&self) -> &FieldHandlers {
        &self.handlers
    }

    /// A fresh unpersisted record of this kind.
    pub fn new_record(&self, owner: u64) -> Record {
        Record::new(self.api_name.clone(), self.family, owner)
    }
}

/// Process-wide catalog of subrecord kinds, in registration order.
#[derive(Default)]
pub struct SubrecordRegistry {
    kinds: Vec<Arc<SubrecordKind>>,
}

impl SubrecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::DuplicateKind`] when the API name is taken.
    pub fn register(&mut self, kind: SubrecordKind) -> RecordResult<()> {
        if self.kinds.iter().any(|k| k.api_name == kind.api_name) {
            return Err(RecordError::DuplicateKind(kind.api_name.clone()));
        }
        self.kinds.push(Arc::new(kind));
        Ok(())
    }

    /// Looks a kind up by API name.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Schema`]: kinds are registered statically, so
    /// a miss is a programming error.
    pub fn get(&self, api_name: &ApiName) -> RecordResult<Arc<SubrecordKind>> {
        self.kinds
            .iter()
            .find(|k| &k.api_name == api_name)
            .cloned()
            .ok_or_else(|| RecordError::Schema(format!("subrecord kind {api_name}")))
    }

    /// Kinds attached to the given root family, in registration order.
    pub fn kinds_for(&self, family: RootFamily) -> impl Iterator<Item = &Arc<SubrecordKind>> {
        self.kinds.iter().filter(move |k| k.family == family)
    }
}

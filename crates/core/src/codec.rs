//! The record codec: the reversible mapping between a typed record instance
//! and a plain key/value payload.
//!
//! `serialize` fans every logical field out to a JSON value; `apply`
//! validates and writes a payload back, owning the concurrency-token
//! protocol. Two concurrent `apply` calls against the same record race on
//! token comparison: exactly one succeeds, the other observes a stale token
//! and must re-fetch and retry. The engine never auto-retries.
//!
//! Many-valued-reference updates are deferred until after persistence (they
//! must see a stable identifier). If their resolution fails, the record is
//! left scalar-updated with relations unchanged: the scalar write and the
//! relation step are not atomic from this engine's perspective, and callers
//! needing atomicity must provide an external transaction boundary.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use ward_types::ApiName;

use crate::access::Actor;
use crate::error::{RecordError, RecordResult};
use crate::fields::{CodedValue, FieldKind, FieldValue};
use crate::ids::EntryId;
use crate::lookup::LookupRegistry;
use crate::record::Record;
use crate::registry::{Payload, SubrecordKind};
use crate::store::MemoryStore;

pub struct RecordCodec {
    kind: Arc<SubrecordKind>,
}

impl RecordCodec {
    pub fn new(kind: Arc<SubrecordKind>) -> Self {
        Self { kind }
    }

    /// Serialises a record to its client payload.
    ///
    /// Custom getters override generic attribute access; many-valued fields
    /// serialise as lists of nested entry payloads; coded fields yield the
    /// resolved text.
    pub fn serialize(
        &self,
        record: &Record,
        actor: &Actor,
        lookups: &LookupRegistry,
    ) -> RecordResult<Payload> {
        self.serialize_fields(record, actor, lookups, self.kind.schema().serialize_names())
    }

    /// The de-identified variant: the same serialisation minus PID fields.
    pub fn extract(
        &self,
        record: &Record,
        actor: &Actor,
        lookups: &LookupRegistry,
    ) -> RecordResult<Payload> {
        self.serialize_fields(record, actor, lookups, self.kind.schema().extract_names())
    }

    fn serialize_fields(
        &self,
        record: &Record,
        actor: &Actor,
        lookups: &LookupRegistry,
        names: &[String],
    ) -> RecordResult<Payload> {
        let mut payload = Payload::new();
        for name in names {
            if let Some(getter) = self.kind.handlers().getter(name) {
                payload.insert(name.clone(), getter(record, actor)?);
                continue;
            }
            let value = if name == "id" {
                record
                    .id()
                    .map(|id| Value::from(id.value()))
                    .unwrap_or(Value::Null)
            } else {
                match self.kind.schema().field_kind(name)? {
                    FieldKind::ManyToMany(list) => {
                        let list = lookups.get(list)?;
                        let mut entries = Vec::new();
                        for id in record.links(name) {
                            let entry = list.entry(id).ok_or_else(|| {
                                RecordError::Schema(format!(
                                    "linked entry {id} missing from lookup list {}",
                                    list.name()
                                ))
                            })?;
                            let mut nested = Payload::new();
                            nested.insert("id".into(), Value::from(entry.id.value()));
                            nested.insert("name".into(), Value::String(entry.name.clone()));
                            entries.push(Value::Object(nested));
                        }
                        Value::Array(entries)
                    }
                    FieldKind::CodedText(list) => match record.coded_value(name) {
                        Some(CodedValue::Resolved(id)) => {
                            let list = lookups.get(list)?;
                            let entry = list.entry(id).ok_or_else(|| {
                                RecordError::Schema(format!(
                                    "coded entry {id} missing from lookup list {}",
                                    list.name()
                                ))
                            })?;
                            Value::String(entry.name.clone())
                        }
                        Some(CodedValue::FreeText(text)) => Value::String(text),
                        None => Value::Null,
                    },
                    _ => record
                        .value(name)
                        .map(FieldValue::to_json)
                        .unwrap_or(Value::Null),
                }
            };
            payload.insert(name.clone(), value);
        }
        Ok(payload)
    }

    /// Validates and writes a payload onto a record.
    ///
    /// Steps, in order: token check (persisted records only), whole-payload
    /// unknown-key rejection, per-field application (custom setters first,
    /// many-valued fields deferred), token regeneration, persistence, then
    /// the deferred many-valued updates.
    ///
    /// # Errors
    ///
    /// - [`RecordError::MissingConsistencyToken`] /
    ///   [`RecordError::ConsistencyMismatch`]: the token protocol failed; no
    ///   state was touched.
    /// - [`RecordError::UnknownFields`]: the payload named unrecognised
    ///   fields; no state was touched.
    /// - [`RecordError::UnknownValues`]: a deferred many-valued update could
    ///   not be resolved. Scalar fields were already persisted at this point
    ///   (see module docs).
    pub fn apply(
        &self,
        record: &mut Record,
        mut payload: Payload,
        actor: &Actor,
        lookups: &LookupRegistry,
        store: &mut MemoryStore,
    ) -> RecordResult<()> {
        tracing::info!(
            kind = %self.kind.api_name(),
            actor = %actor.username,
            "applying payload to record"
        );

        if record.is_persisted() {
            let presented = payload
                .remove("consistency_token")
                .ok_or(RecordError::MissingConsistencyToken)?;
            let presented = presented.as_str().unwrap_or_default().to_owned();
            let current = record
                .consistency_token()
                .map(|t| t.as_str().to_owned())
                .unwrap_or_default();
            if presented != current {
                return Err(RecordError::ConsistencyMismatch);
            }
        }

        let schema = self.kind.schema();
        let unknown: Vec<String> = payload
            .keys()
            .filter(|key| !schema.is_known(key))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(RecordError::UnknownFields(unknown));
        }

        let mut deferred: Vec<(String, ApiName, Vec<String>)> = Vec::new();
        for name in schema.serialize_names() {
            if name == "id" || name == "consistency_token" {
                continue;
            }
            if let Some(setter) = self.kind.handlers().setter(name) {
                setter(record, payload.get(name), actor, &payload)?;
                continue;
            }
            let Some(value) = payload.get(name) else {
                continue;
            };
            match schema.field_kind(name)? {
                FieldKind::ManyToMany(list) => {
                    deferred.push((name.clone(), list.clone(), requested_names(name, value)?));
                }
                FieldKind::CodedText(list) => {
                    let coded = match value {
                        Value::Null => None,
                        Value::String(text) => Some(
                            lookups
                                .get(list)?
                                .find(text)
                                .map(CodedValue::Resolved)
                                .unwrap_or_else(|| CodedValue::FreeText(text.clone())),
                        ),
                        _ => {
                            return Err(RecordError::InvalidValue {
                                field: name.clone(),
                                expected: "string",
                            })
                        }
                    };
                    record.set_coded(name, coded);
                }
                kind => {
                    record.set_value(name.clone(), FieldValue::from_json(kind, name, value)?);
                }
            }
        }

        record.set_fresh_token();
        store.persist_record(record)?;

        if !deferred.is_empty() {
            for (name, list, values) in &deferred {
                self.save_many_to_many(record, name, list, values, lookups)?;
            }
            store.persist_record(record)?;
        }

        Ok(())
    }

    /// Reconciles one many-valued-reference field against requested names:
    /// resolve, then add the missing and remove the extraneous links.
    fn save_many_to_many(
        &self,
        record: &mut Record,
        name: &str,
        list: &ApiName,
        values: &[String],
        lookups: &LookupRegistry,
    ) -> RecordResult<()> {
        let list = lookups.get(list)?;
        let resolved: BTreeSet<EntryId> = list.resolve_names(values)?.into_iter().collect();
        let existing = record.links(name);

        for id in resolved.difference(&existing) {
            record.add_link(name, *id);
        }
        for id in existing.difference(&resolved) {
            record.remove_link(name, *id);
        }
        Ok(())
    }
}

/// Extracts the requested entry names of a many-valued payload value.
/// Accepts plain strings or nested entry payloads, so serialised output is
/// accepted back unchanged.
fn requested_names(field: &str, value: &Value) -> RecordResult<Vec<String>> {
    let invalid = || RecordError::InvalidValue {
        field: field.to_owned(),
        expected: "list of entry names",
    };
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(name.clone()),
                Value::Object(map) => map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldSpec;
    use crate::ids::UserId;
    use crate::registry::SubrecordRegistry;
    use crate::schema::RootFamily;
    use serde_json::json;

    fn api(name: &str) -> ApiName {
        ApiName::new(name).unwrap()
    }

    /// A micro test result: coded organism, free text details, a date, and a
    /// many-valued organism list.
    fn registry() -> SubrecordRegistry {
        let mut registry = SubrecordRegistry::new();
        registry
            .register(SubrecordKind::new(
                api("micro_test"),
                "Micro Test",
                RootFamily::Episode,
                vec![
                    FieldSpec::new("organism", FieldKind::CodedText(api("microbiology_organism"))),
                    FieldSpec::new("details", FieldKind::Text),
                    FieldSpec::new("provisional", FieldKind::Boolean),
                    FieldSpec::new("date_ordered", FieldKind::Date),
                    FieldSpec::new(
                        "isolates",
                        FieldKind::ManyToMany(api("microbiology_organism")),
                    ),
                ],
            ))
            .expect("registration should succeed");
        registry
    }

    fn lookups() -> LookupRegistry {
        let mut lookups = LookupRegistry::new();
        let organisms = lookups.create(api("microbiology_organism"));
        let e_coli = organisms.insert("E. coli").unwrap();
        organisms.insert("S. aureus").unwrap();
        organisms.add_synonym(e_coli, "Ecoli").unwrap();
        lookups
    }

    fn actor() -> Actor {
        Actor::new(UserId(1), "dr_jones")
    }

    struct Fixture {
        codec: RecordCodec,
        lookups: LookupRegistry,
        store: MemoryStore,
        record: Record,
    }

    /// A persisted empty micro_test record attached to a fresh episode.
    fn fixture() -> Fixture {
        let registry = registry();
        let kind = registry.get(&api("micro_test")).unwrap();
        let mut store = MemoryStore::new();
        let patient = store.insert_patient();
        let episode = store.insert_episode(patient, "inpatient".into()).unwrap();

        let mut record = kind.new_record(episode.value());
        record.set_fresh_token();
        store.persist_record(&mut record).unwrap();

        Fixture {
            codec: RecordCodec::new(kind),
            lookups: lookups(),
            store,
            record,
        }
    }

    fn token_of(record: &Record) -> String {
        record.consistency_token().unwrap().as_str().to_owned()
    }

    #[test]
    fn test_apply_then_serialize_round_trips_domain_fields() {
        let mut fx = fixture();
        let actor = actor();

        let payload = json!({
            "consistency_token": token_of(&fx.record),
            "organism": "Ecoli",
            "details": "blood culture",
            "provisional": true,
            "date_ordered": "2024-03-09",
        });
        fx.codec
            .apply(
                &mut fx.record,
                payload.as_object().unwrap().clone(),
                &actor,
                &fx.lookups,
                &mut fx.store,
            )
            .expect("apply should succeed");

        let serialized = fx
            .codec
            .serialize(&fx.record, &actor, &fx.lookups)
            .expect("serialize should succeed");
        assert_eq!(serialized["organism"], json!("E. coli"), "synonym resolves to entry");
        assert_eq!(serialized["details"], json!("blood culture"));
        assert_eq!(serialized["provisional"], json!(true));
        assert_eq!(serialized["date_ordered"], json!("2024-03-09"));

        // Full round-trip: the serialised payload (with its just-read token)
        // applies cleanly and changes nothing but the token.
        let before = serialized.clone();
        fx.codec
            .apply(&mut fx.record, serialized, &actor, &fx.lookups, &mut fx.store)
            .expect("round-trip apply should succeed");
        let after = fx
            .codec
            .serialize(&fx.record, &actor, &fx.lookups)
            .expect("serialize should succeed");

        for name in ["organism", "details", "provisional", "date_ordered", "isolates", "id"] {
            assert_eq!(after[name], before[name], "{name} should be unchanged");
        }
        assert_ne!(
            after["consistency_token"], before["consistency_token"],
            "token must be freshly generated"
        );
    }

    #[test]
    fn test_missing_token_is_rejected_without_mutation() {
        let mut fx = fixture();
        let stored_before = fx.store.record(fx.record.id().unwrap()).unwrap();

        let err = fx
            .codec
            .apply(
                &mut fx.record,
                json!({"details": "x"}).as_object().unwrap().clone(),
                &actor(),
                &fx.lookups,
                &mut fx.store,
            )
            .expect_err("missing token should be rejected");
        assert!(matches!(err, RecordError::MissingConsistencyToken));

        let stored_after = fx.store.record(fx.record.id().unwrap()).unwrap();
        assert_eq!(stored_after.value("details"), stored_before.value("details"));
        assert_eq!(token_of(&stored_after), token_of(&stored_before));
    }

    #[test]
    fn test_stale_token_is_rejected_without_mutation() {
        let mut fx = fixture();
        let err = fx
            .codec
            .apply(
                &mut fx.record,
                json!({"consistency_token": "deadbeef", "details": "x"})
                    .as_object()
                    .unwrap()
                    .clone(),
                &actor(),
                &fx.lookups,
                &mut fx.store,
            )
            .expect_err("stale token should be rejected");
        assert!(matches!(err, RecordError::ConsistencyMismatch));

        let stored = fx.store.record(fx.record.id().unwrap()).unwrap();
        assert!(stored.value("details").is_none(), "no field may be written");
    }

    #[test]
    fn test_unpersisted_record_skips_token_check() {
        let fx = fixture();
        let registry = registry();
        let kind = registry.get(&api("micro_test")).unwrap();
        let mut store = fx.store;
        let mut record = kind.new_record(1);

        RecordCodec::new(kind)
            .apply(
                &mut record,
                json!({"details": "first write"}).as_object().unwrap().clone(),
                &actor(),
                &fx.lookups,
                &mut store,
            )
            .expect("creation must not demand a token");
        assert!(record.is_persisted());
    }

    #[test]
    fn test_unknown_field_rejects_whole_payload() {
        let mut fx = fixture();
        let token = token_of(&fx.record);
        let err = fx
            .codec
            .apply(
                &mut fx.record,
                json!({
                    "not_a_real_field": 1,
                    "details": "x",
                    "consistency_token": token,
                })
                .as_object()
                .unwrap()
                .clone(),
                &actor(),
                &fx.lookups,
                &mut fx.store,
            )
            .expect_err("unknown field should fail the whole operation");
        match err {
            RecordError::UnknownFields(fields) => {
                assert_eq!(fields, vec!["not_a_real_field".to_string()]);
            }
            other => panic!("expected UnknownFields, got {other:?}"),
        }

        let stored = fx.store.record(fx.record.id().unwrap()).unwrap();
        assert!(stored.value("details").is_none(), "no partial application");
    }

    #[test]
    fn test_legacy_physical_names_pass_the_presence_check() {
        let mut fx = fixture();
        // Clients that still send the physical halves are not rejected as
        // unknown fields; the logical entry owns the write path.
        let token = token_of(&fx.record);
        fx.codec
            .apply(
                &mut fx.record,
                json!({
                    "consistency_token": token,
                    "organism_ft": "unusual growth",
                })
                .as_object()
                .unwrap()
                .clone(),
                &actor(),
                &fx.lookups,
                &mut fx.store,
            )
            .expect("physical names are known names");
    }

    #[test]
    fn test_audit_fields_ride_the_setter_pipeline() {
        let fx = fixture();
        let registry = registry();
        let kind = registry.get(&api("micro_test")).unwrap();
        let codec = RecordCodec::new(kind.clone());
        let mut store = fx.store;
        let creator = Actor::new(UserId(7), "creator");
        let editor = Actor::new(UserId(8), "editor");

        let mut record = kind.new_record(1);
        codec
            .apply(
                &mut record,
                json!({"details": "seen"}).as_object().unwrap().clone(),
                &creator,
                &fx.lookups,
                &mut store,
            )
            .expect("create should succeed");
        assert_eq!(record.value("created_by_id"), Some(&FieldValue::Ref(7)));
        assert!(matches!(record.value("created"), Some(FieldValue::DateTime(_))));
        assert!(record.value("updated").is_none());

        let token = token_of(&record);
        codec
            .apply(
                &mut record,
                json!({
                    "consistency_token": token,
                    "details": "reviewed",
                })
                .as_object()
                .unwrap()
                .clone(),
                &editor,
                &fx.lookups,
                &mut store,
            )
            .expect("update should succeed");
        assert_eq!(record.value("created_by_id"), Some(&FieldValue::Ref(7)));
        assert_eq!(record.value("updated_by_id"), Some(&FieldValue::Ref(8)));
        assert!(matches!(record.value("updated"), Some(FieldValue::DateTime(_))));
    }

    #[test]
    fn test_many_to_many_adds_and_removes_links() {
        let mut fx = fixture();
        let actor = actor();

        let token = token_of(&fx.record);
        fx.codec
            .apply(
                &mut fx.record,
                json!({
                    "consistency_token": token,
                    "isolates": ["E. coli", "S. aureus"],
                })
                .as_object()
                .unwrap()
                .clone(),
                &actor,
                &fx.lookups,
                &mut fx.store,
            )
            .expect("adding links should succeed");
        assert_eq!(fx.record.links("isolates").len(), 2);

        let token = token_of(&fx.record);
        fx.codec
            .apply(
                &mut fx.record,
                json!({
                    "consistency_token": token,
                    "isolates": ["Ecoli"],
                })
                .as_object()
                .unwrap()
                .clone(),
                &actor,
                &fx.lookups,
                &mut fx.store,
            )
            .expect("shrinking links should succeed");

        let stored = fx.store.record(fx.record.id().unwrap()).unwrap();
        let serialized = fx.codec.serialize(&stored, &actor, &fx.lookups).unwrap();
        assert_eq!(
            serialized["isolates"],
            json!([{"id": 1, "name": "E. coli"}]),
            "synonym request resolves to the canonical entry, extraneous link removed"
        );
    }

    #[test]
    fn test_failed_resolution_leaves_scalars_persisted_and_links_unchanged() {
        let mut fx = fixture();
        let token = token_of(&fx.record);
        let err = fx
            .codec
            .apply(
                &mut fx.record,
                json!({
                    "consistency_token": token,
                    "details": "written anyway",
                    "isolates": ["Totally Unknown"],
                })
                .as_object()
                .unwrap()
                .clone(),
                &actor(),
                &fx.lookups,
                &mut fx.store,
            )
            .expect_err("unresolvable value should fail");
        assert!(matches!(err, RecordError::UnknownValues(_)));

        // The known inconsistency window: scalars persisted, links untouched.
        let stored = fx.store.record(fx.record.id().unwrap()).unwrap();
        assert_eq!(
            stored.value("details"),
            Some(&FieldValue::Text("written anyway".into()))
        );
        assert!(stored.links("isolates").is_empty());
    }

    #[test]
    fn test_free_text_falls_back_when_vocabulary_misses() {
        let mut fx = fixture();
        let actor = actor();
        let token = token_of(&fx.record);
        fx.codec
            .apply(
                &mut fx.record,
                json!({
                    "consistency_token": token,
                    "organism": "never catalogued",
                })
                .as_object()
                .unwrap()
                .clone(),
                &actor,
                &fx.lookups,
                &mut fx.store,
            )
            .expect("free text should be accepted");
        assert_eq!(
            fx.record.coded_value("organism"),
            Some(CodedValue::FreeText("never catalogued".into()))
        );

        let serialized = fx.codec.serialize(&fx.record, &actor, &fx.lookups).unwrap();
        assert_eq!(serialized["organism"], json!("never catalogued"));
    }

    #[test]
    fn test_extract_omits_nothing_for_pid_free_kind() {
        let fx = fixture();
        let actor = actor();
        let serialized = fx.codec.serialize(&fx.record, &actor, &fx.lookups).unwrap();
        let extracted = fx.codec.extract(&fx.record, &actor, &fx.lookups).unwrap();
        assert_eq!(serialized.len(), extracted.len());
    }

    #[test]
    fn test_custom_getter_overrides_generic_access() {
        let mut registry = SubrecordRegistry::new();
        registry
            .register(
                SubrecordKind::new(
                    api("note"),
                    "Note",
                    RootFamily::Episode,
                    vec![FieldSpec::new("body", FieldKind::Text)],
                )
                .with_getter(
                    "body",
                    Box::new(|record, _actor| {
                        let text = match record.value("body") {
                            Some(FieldValue::Text(t)) => t.to_uppercase(),
                            _ => String::new(),
                        };
                        Ok(Value::String(text))
                    }),
                ),
            )
            .unwrap();

        let kind = registry.get(&api("note")).unwrap();
        let mut record = kind.new_record(1);
        record.set_value("body", FieldValue::Text("quiet".into()));

        let payload = RecordCodec::new(kind)
            .serialize(&record, &actor(), &LookupRegistry::new())
            .unwrap();
        assert_eq!(payload["body"], json!("QUIET"));
    }
}

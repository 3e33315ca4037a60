//! Dynamically shaped record instances.
//!
//! A [`Record`] is one instance of a registered subrecord kind: a bag of
//! storage attributes plus many-to-many link sets, shaped by the kind's
//! [`SubrecordSchema`](crate::schema::SubrecordSchema). Records are detached
//! values; the store clones them in on persist and hands out fresh copies on
//! read.

use std::collections::{BTreeMap, BTreeSet};

use ward_types::ApiName;

use crate::fields::{CodedValue, ConsistencyToken, FieldValue, FK_SUFFIX, FT_SUFFIX};
use crate::ids::{EntryId, EpisodeId, PatientId, RecordId};
use crate::schema::RootFamily;

#[derive(Debug, Clone)]
pub struct Record {
    kind: ApiName,
    id: Option<RecordId>,
    values: BTreeMap<String, FieldValue>,
    links: BTreeMap<String, BTreeSet<EntryId>>,
}

impl Record {
    /// Creates an unpersisted record owned by the given aggregate.
    pub fn new(kind: ApiName, family: RootFamily, owner: u64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(family.owner_field().to_owned(), FieldValue::Ref(owner));
        Self {
            kind,
            id: None,
            values,
            links: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> &ApiName {
        &self.kind
    }

    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    /// Whether the record has been persisted. Persisted records demand the
    /// consistency-token protocol on every update.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub(crate) fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: FieldValue) {
        self.values.insert(name.into(), value);
    }

    /// The owning patient, when this record belongs to the patient family.
    pub fn patient_id(&self) -> Option<PatientId> {
        match self.values.get(RootFamily::Patient.owner_field()) {
            Some(FieldValue::Ref(id)) => Some(PatientId(*id)),
            _ => None,
        }
    }

    /// The owning episode, when this record belongs to the episode family.
    pub fn episode_id(&self) -> Option<EpisodeId> {
        match self.values.get(RootFamily::Episode.owner_field()) {
            Some(FieldValue::Ref(id)) => Some(EpisodeId(*id)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Consistency token
    // ------------------------------------------------------------------

    pub fn consistency_token(&self) -> Option<ConsistencyToken> {
        match self.values.get("consistency_token") {
            Some(FieldValue::Text(token)) => Some(ConsistencyToken::from_value(token)),
            _ => None,
        }
    }

    /// Regenerates the token. Called on every successful mutation.
    pub fn set_fresh_token(&mut self) {
        self.values.insert(
            "consistency_token".to_owned(),
            FieldValue::Text(ConsistencyToken::generate().as_str().to_owned()),
        );
    }

    // ------------------------------------------------------------------
    // Coded (reference-or-free-text) fields
    // ------------------------------------------------------------------

    /// Reads a coded field: a resolved vocabulary reference wins over free
    /// text.
    pub fn coded_value(&self, name: &str) -> Option<CodedValue> {
        match self.values.get(&format!("{name}{FK_SUFFIX}")) {
            Some(FieldValue::Ref(id)) => return Some(CodedValue::Resolved(EntryId(*id))),
            _ => {}
        }
        match self.values.get(&format!("{name}{FT_SUFFIX}")) {
            Some(FieldValue::Text(text)) => Some(CodedValue::FreeText(text.clone())),
            _ => None,
        }
    }

    /// Writes a coded field, keeping the two physical halves mutually
    /// exclusive.
    pub fn set_coded(&mut self, name: &str, value: Option<CodedValue>) {
        let fk = format!("{name}{FK_SUFFIX}");
        let ft = format!("{name}{FT_SUFFIX}");
        match value {
            Some(CodedValue::Resolved(id)) => {
                self.values.insert(fk, FieldValue::Ref(id.value()));
                self.values.insert(ft, FieldValue::Null);
            }
            Some(CodedValue::FreeText(text)) => {
                self.values.insert(fk, FieldValue::Null);
                self.values.insert(ft, FieldValue::Text(text));
            }
            None => {
                self.values.insert(fk, FieldValue::Null);
                self.values.insert(ft, FieldValue::Null);
            }
        }
    }

    // ------------------------------------------------------------------
    // Many-to-many links
    // ------------------------------------------------------------------

    /// Current membership of a many-valued-reference field.
    pub fn links(&self, name: &str) -> BTreeSet<EntryId> {
        self.links.get(name).cloned().unwrap_or_default()
    }

    pub fn add_link(&mut self, name: &str, entry: EntryId) {
        self.links.entry(name.to_owned()).or_default().insert(entry);
    }

    pub fn remove_link(&mut self, name: &str, entry: EntryId) {
        if let Some(set) = self.links.get_mut(name) {
            set.remove(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new(
            ApiName::new("diagnosis").unwrap(),
            RootFamily::Episode,
            7,
        )
    }

    #[test]
    fn test_new_record_is_unpersisted_and_owned() {
        let record = record();
        assert!(!record.is_persisted());
        assert_eq!(record.episode_id(), Some(EpisodeId(7)));
        assert_eq!(record.patient_id(), None);
    }

    #[test]
    fn test_fresh_token_replaces_previous_token() {
        let mut record = record();
        record.set_fresh_token();
        let first = record.consistency_token().expect("token should be set");
        record.set_fresh_token();
        let second = record.consistency_token().expect("token should be set");
        assert_ne!(first, second, "token must be regenerated on mutation");
    }

    #[test]
    fn test_coded_halves_are_mutually_exclusive() {
        let mut record = record();
        record.set_coded("condition", Some(CodedValue::FreeText("headache".into())));
        assert_eq!(
            record.coded_value("condition"),
            Some(CodedValue::FreeText("headache".into()))
        );

        record.set_coded("condition", Some(CodedValue::Resolved(EntryId(3))));
        assert_eq!(
            record.coded_value("condition"),
            Some(CodedValue::Resolved(EntryId(3)))
        );
        assert_eq!(
            record.value("condition_ft"),
            Some(&FieldValue::Null),
            "free text must be cleared when a reference is set"
        );
    }

    #[test]
    fn test_links_default_empty() {
        let mut record = record();
        assert!(record.links("organisms").is_empty());
        record.add_link("organisms", EntryId(1));
        record.add_link("organisms", EntryId(2));
        record.remove_link("organisms", EntryId(1));
        assert_eq!(record.links("organisms"), BTreeSet::from([EntryId(2)]));
    }
}

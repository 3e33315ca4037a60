//! Aggregate roots and whole-aggregate composition.
//!
//! Patients own episodes; both own subrecord instances. [`AggregateService`]
//! provisions the singleton subrecords each root is guaranteed to carry and
//! composes full nested payloads: a patient payload embeds all of its
//! episodes, an episode payload embeds its subrecord lists, the tag-state
//! view and a shallow history of the patient's other episodes.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::access::Actor;
use crate::codec::RecordCodec;
use crate::config::CoreConfig;
use crate::error::{RecordError, RecordResult};
use crate::fields::{ConsistencyToken, DATE_FORMAT};
use crate::ids::{EpisodeId, PatientId};
use crate::lookup::LookupRegistry;
use crate::registry::{Payload, SubrecordRegistry};
use crate::schema::RootFamily;
use crate::store::MemoryStore;
use crate::tagging;
use crate::teams::TeamDirectory;

/// A patient: the top-level aggregate root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    pub id: PatientId,
}

/// One interaction between a patient and a service, over an interval.
///
/// `date_of_episode` marks a single-day interaction and takes precedence
/// over the admission/discharge pair at both ends of the interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub id: EpisodeId,
    pub patient: PatientId,
    pub category: String,
    /// Maintained by tag reconciliation, not set directly.
    pub active: bool,
    pub date_of_admission: Option<NaiveDate>,
    pub discharge_date: Option<NaiveDate>,
    pub date_of_episode: Option<NaiveDate>,
    /// Generated once at creation and serialised for clients. Episode
    /// scalars are written back through the store directly (tag
    /// reconciliation does so for `active`), outside the codec's token
    /// protocol, so store-level updates neither check nor regenerate it.
    pub consistency_token: ConsistencyToken,
}

impl Episode {
    pub fn new(id: EpisodeId, patient: PatientId, category: String) -> Self {
        Self {
            id,
            patient,
            category,
            active: false,
            date_of_admission: None,
            discharge_date: None,
            date_of_episode: None,
            consistency_token: ConsistencyToken::generate(),
        }
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.date_of_episode.or(self.date_of_admission)
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.date_of_episode.or(self.discharge_date)
    }

    /// An inactive episode is discharged; an active one only once its end
    /// date has passed.
    pub fn is_discharged(&self) -> bool {
        if !self.active {
            return true;
        }
        match self.end_date() {
            Some(end) => end < Utc::now().date_naive(),
            None => false,
        }
    }

    /// The shallow payload used for episode history listings: intrinsic
    /// fields only, no subrecords.
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("id".into(), Value::from(self.id.value()));
        payload.insert("category".into(), Value::String(self.category.clone()));
        payload.insert("active".into(), Value::Bool(self.active));
        payload.insert("date_of_admission".into(), date_value(self.date_of_admission));
        payload.insert("discharge_date".into(), date_value(self.discharge_date));
        payload.insert("date_of_episode".into(), date_value(self.date_of_episode));
        payload.insert(
            "consistency_token".into(),
            Value::String(self.consistency_token.as_str().to_owned()),
        );
        payload
    }
}

fn date_value(date: Option<NaiveDate>) -> Value {
    date.map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
        .unwrap_or(Value::Null)
}

/// Creates aggregate roots with their guaranteed singletons and composes
/// their nested payloads.
pub struct AggregateService {
    cfg: Arc<CoreConfig>,
    registry: Arc<SubrecordRegistry>,
}

impl AggregateService {
    pub fn new(cfg: Arc<CoreConfig>, registry: Arc<SubrecordRegistry>) -> Self {
        Self { cfg, registry }
    }

    /// Creates a patient and provisions its singleton subrecords.
    pub fn create_patient(&self, store: &mut MemoryStore) -> RecordResult<PatientId> {
        let id = store.insert_patient();
        self.provision_singletons(store, RootFamily::Patient, id.value())?;
        tracing::info!(patient = %id, "created patient");
        Ok(id)
    }

    /// Creates an episode for a patient and provisions its singleton
    /// subrecords. Without an explicit category the configured default
    /// applies.
    pub fn create_episode(
        &self,
        store: &mut MemoryStore,
        patient: PatientId,
        category: Option<&str>,
    ) -> RecordResult<EpisodeId> {
        let category = category
            .unwrap_or_else(|| self.cfg.default_episode_category())
            .to_owned();
        let id = store.insert_episode(patient, category)?;
        self.provision_singletons(store, RootFamily::Episode, id.value())?;
        tracing::info!(patient = %patient, episode = %id, "created episode");
        Ok(id)
    }

    fn provision_singletons(
        &self,
        store: &mut MemoryStore,
        family: RootFamily,
        owner: u64,
    ) -> RecordResult<()> {
        for kind in self.registry.kinds_for(family).filter(|k| k.is_singleton()) {
            store.create_singleton_if_absent(kind, owner)?;
        }
        Ok(())
    }

    /// The patient's current episode: the active episode with the highest
    /// identifier, when any episode is active.
    pub fn active_episode(&self, store: &MemoryStore, patient: PatientId) -> Option<Episode> {
        store
            .episodes_for_patient(patient)
            .into_iter()
            .filter(|e| e.active)
            .max_by_key(|e| e.id)
    }

    /// Composes the full episode payload: intrinsic fields, one list per
    /// episode subrecord kind, the owning patient's subrecord lists, the
    /// tag-state view, and the patient's episode history as shallow payloads.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NoSuchEpisode`] when the episode does not
    /// exist; serialisation errors propagate from the codec.
    pub fn compose_episode(
        &self,
        store: &MemoryStore,
        lookups: &LookupRegistry,
        teams: &TeamDirectory,
        episode_id: EpisodeId,
        actor: &Actor,
    ) -> RecordResult<Payload> {
        let episode = store
            .episode(episode_id)
            .ok_or(RecordError::NoSuchEpisode(episode_id.value()))?;
        let mut payload = episode.to_payload();

        for kind in self.registry.kinds_for(RootFamily::Episode) {
            let codec = RecordCodec::new(Arc::clone(kind));
            let mut items = Vec::new();
            for record in store.records_for_episode(kind.api_name(), episode_id) {
                items.push(Value::Object(codec.serialize(&record, actor, lookups)?));
            }
            payload.insert(kind.api_name().to_string(), Value::Array(items));
        }

        // Episode payloads carry the owning patient's subrecords too, so a
        // client holding an episode never needs a second fetch.
        for kind in self.registry.kinds_for(RootFamily::Patient) {
            let codec = RecordCodec::new(Arc::clone(kind));
            let mut items = Vec::new();
            for record in store.records_for_patient(kind.api_name(), episode.patient) {
                items.push(Value::Object(codec.serialize(&record, actor, lookups)?));
            }
            payload.insert(kind.api_name().to_string(), Value::Array(items));
        }

        payload.insert(
            "tagging".into(),
            Value::Array(vec![Value::Object(tagging::tagging_view(
                store, teams, episode_id, actor,
            ))]),
        );

        let mut history = store.episodes_for_patient(episode.patient);
        history.sort_by(|a, b| {
            (a.date_of_episode, a.date_of_admission, a.discharge_date).cmp(&(
                b.date_of_episode,
                b.date_of_admission,
                b.discharge_date,
            ))
        });
        payload.insert(
            "episode_history".into(),
            Value::Array(history.iter().map(|e| Value::Object(e.to_payload())).collect()),
        );

        Ok(payload)
    }

    /// Composes the full patient payload: one list per patient subrecord
    /// kind plus every episode, fully composed.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NoSuchPatient`] when the patient does not
    /// exist; serialisation errors propagate from the codec.
    pub fn compose_patient(
        &self,
        store: &MemoryStore,
        lookups: &LookupRegistry,
        teams: &TeamDirectory,
        patient_id: PatientId,
        actor: &Actor,
    ) -> RecordResult<Payload> {
        store
            .patient(patient_id)
            .ok_or(RecordError::NoSuchPatient(patient_id.value()))?;

        let mut payload = Payload::new();
        payload.insert("id".into(), Value::from(patient_id.value()));
        payload.insert(
            "active_episode_id".into(),
            self.active_episode(store, patient_id)
                .map(|e| Value::from(e.id.value()))
                .unwrap_or(Value::Null),
        );

        for kind in self.registry.kinds_for(RootFamily::Patient) {
            let codec = RecordCodec::new(Arc::clone(kind));
            let mut items = Vec::new();
            for record in store.records_for_patient(kind.api_name(), patient_id) {
                items.push(Value::Object(codec.serialize(&record, actor, lookups)?));
            }
            payload.insert(kind.api_name().to_string(), Value::Array(items));
        }

        let mut episodes = Vec::new();
        for episode in store.episodes_for_patient(patient_id) {
            episodes.push(Value::Object(self.compose_episode(
                store, lookups, teams, episode.id, actor,
            )?));
        }
        payload.insert("episodes".into(), Value::Array(episodes));

        Ok(payload)
    }
}

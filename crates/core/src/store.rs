//! In-memory storage collaborator.
//!
//! [`MemoryStore`] is the seam where a persistence engine would sit. It owns
//! aggregate roots, subrecord instances and tagging rows, allocates
//! identifiers, and answers owner-filtered queries. Records are detached:
//! `persist_record` clones the caller's copy in, reads hand fresh copies out.
//!
//! The store provides no locking and no transactions; the consistency-token
//! protocol in the codec is the only concurrency control (see the codec
//! docs). Callers needing multi-row atomicity must wrap operations in an
//! external transaction boundary.

use std::collections::BTreeMap;

use ward_types::ApiName;

use crate::aggregate::{Episode, Patient};
use crate::error::{RecordError, RecordResult};
use crate::ids::{EpisodeId, PatientId, RecordId, TaggingId};
use crate::record::Record;
use crate::registry::SubrecordKind;
use crate::schema::RootFamily;
use crate::tagging::Tagging;

#[derive(Default)]
pub struct MemoryStore {
    next_patient: u64,
    next_episode: u64,
    next_record: u64,
    next_tagging: u64,
    patients: BTreeMap<PatientId, Patient>,
    episodes: BTreeMap<EpisodeId, Episode>,
    records: BTreeMap<RecordId, Record>,
    taggings: BTreeMap<TaggingId, Tagging>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Aggregate roots
    // ------------------------------------------------------------------

    pub fn insert_patient(&mut self) -> PatientId {
        self.next_patient += 1;
        let id = PatientId(self.next_patient);
        self.patients.insert(id, Patient { id });
        id
    }

    pub fn patient(&self, id: PatientId) -> Option<&Patient> {
        self.patients.get(&id)
    }

    pub fn insert_episode(&mut self, patient: PatientId, category: String) -> RecordResult<EpisodeId> {
        if !self.patients.contains_key(&patient) {
            return Err(RecordError::NoSuchPatient(patient.value()));
        }
        self.next_episode += 1;
        let id = EpisodeId(self.next_episode);
        self.episodes.insert(id, Episode::new(id, patient, category));
        Ok(id)
    }

    pub fn episode(&self, id: EpisodeId) -> Option<Episode> {
        self.episodes.get(&id).cloned()
    }

    /// Writes a modified episode back.
    pub fn update_episode(&mut self, episode: Episode) -> RecordResult<()> {
        if !self.episodes.contains_key(&episode.id) {
            return Err(RecordError::NoSuchEpisode(episode.id.value()));
        }
        self.episodes.insert(episode.id, episode);
        Ok(())
    }

    /// Episodes owned by a patient, in id order.
    pub fn episodes_for_patient(&self, patient: PatientId) -> Vec<Episode> {
        self.episodes
            .values()
            .filter(|e| e.patient == patient)
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Subrecords
    // ------------------------------------------------------------------

    /// Persists a record, allocating its identifier on first persist.
    pub fn persist_record(&mut self, record: &mut Record) -> RecordResult<RecordId> {
        let id = match record.id() {
            Some(id) => {
                if !self.records.contains_key(&id) {
                    return Err(RecordError::NoSuchRecord(id.value()));
                }
                id
            }
            None => {
                self.next_record += 1;
                let id = RecordId(self.next_record);
                record.assign_id(id);
                id
            }
        };
        self.records.insert(id, record.clone());
        Ok(id)
    }

    pub fn record(&self, id: RecordId) -> Option<Record> {
        self.records.get(&id).cloned()
    }

    /// Records of one kind owned by a patient, in id order.
    pub fn records_for_patient(&self, kind: &ApiName, patient: PatientId) -> Vec<Record> {
        self.records
            .values()
            .filter(|r| r.kind() == kind && r.patient_id() == Some(patient))
            .cloned()
            .collect()
    }

    /// Records of one kind owned by an episode, in id order.
    pub fn records_for_episode(&self, kind: &ApiName, episode: EpisodeId) -> Vec<Record> {
        self.records
            .values()
            .filter(|r| r.kind() == kind && r.episode_id() == Some(episode))
            .cloned()
            .collect()
    }

    /// Atomic create-if-not-exists for singleton subrecord provisioning.
    ///
    /// Returns the existing instance when one is already present, so repeat
    /// provisioning of the same (owner, kind) pair is exactly-once.
    pub fn create_singleton_if_absent(
        &mut self,
        kind: &SubrecordKind,
        owner: u64,
    ) -> RecordResult<RecordId> {
        let existing = self.records.values().find(|r| {
            r.kind() == kind.api_name()
                && match kind.family() {
                    RootFamily::Patient => r.patient_id().map(|p| p.value()) == Some(owner),
                    RootFamily::Episode => r.episode_id().map(|e| e.value()) == Some(owner),
                }
        });
        if let Some(record) = existing {
            // id is always set for stored records
            return record.id().ok_or(RecordError::NoSuchRecord(0));
        }
        let mut record = kind.new_record(owner);
        record.set_fresh_token();
        self.persist_record(&mut record)
    }

    // ------------------------------------------------------------------
    // Taggings
    // ------------------------------------------------------------------

    /// Inserts a tagging row, enforcing at most one per
    /// (episode, team, user) combination.
    pub fn insert_tagging(&mut self, tagging: Tagging) -> RecordResult<TaggingId> {
        let duplicate = self.taggings.values().any(|t| {
            t.episode == tagging.episode && t.team == tagging.team && t.user == tagging.user
        });
        if duplicate {
            return Err(RecordError::InvalidInput(format!(
                "tagging already exists for episode {} team {}",
                tagging.episode, tagging.team
            )));
        }
        self.next_tagging += 1;
        let id = TaggingId(self.next_tagging);
        self.taggings.insert(id, Tagging { id, ..tagging });
        Ok(id)
    }

    pub fn taggings_for_episode(&self, episode: EpisodeId) -> Vec<Tagging> {
        self.taggings
            .values()
            .filter(|t| t.episode == episode)
            .cloned()
            .collect()
    }

    /// Removes a tagging row, returning it for archiving.
    pub fn remove_tagging(&mut self, id: TaggingId) -> Option<Tagging> {
        self.taggings.remove(&id)
    }
}

//! Deleted-record archive and historic tag reconstruction.
//!
//! The archive is an append-only log of serialised field snapshots taken
//! when records are removed from the live store. Historic reconstruction
//! reads only the archive, never live taggings: it answers "which tags did
//! this episode ever have", long after the rows were deleted.
//!
//! Archived team references may point at teams that have since been removed
//! from the directory. Those entries are unrecoverable and are skipped with
//! a warning. An entry that carries neither a team reference nor a raw
//! `tag_name` has an unexpected shape and fails loudly.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use ward_types::ApiName;

use crate::error::{RecordError, RecordResult};
use crate::ids::{EpisodeId, TeamId};
use crate::registry::Payload;
use crate::teams::TeamDirectory;

/// One archived snapshot of a deleted record's fields.
#[derive(Debug, Clone)]
pub struct ArchivedSnapshot {
    pub kind: ApiName,
    pub fields: Payload,
    pub deleted_at: DateTime<Utc>,
}

/// Append-only log of deleted records.
#[derive(Debug, Clone, Default)]
pub struct DeletedRecordArchive {
    entries: Vec<ArchivedSnapshot>,
}

impl DeletedRecordArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a snapshot for a record being deleted from the live store.
    pub fn record_delete(&mut self, kind: ApiName, fields: Payload) {
        self.entries.push(ArchivedSnapshot {
            kind,
            fields,
            deleted_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[ArchivedSnapshot] {
        &self.entries
    }
}

/// Resolves the tag name of an archived tagging snapshot.
///
/// Preference order: the team reference, then the raw `tag_name` string when
/// no team reference key is present at all. A team reference that no longer
/// resolves in the live directory yields `None` (skipped, warned).
///
/// # Errors
///
/// Returns [`RecordError::CorruptArchive`] when neither field exists.
fn tag_name_for(snapshot: &ArchivedSnapshot, teams: &TeamDirectory) -> RecordResult<Option<String>> {
    if let Some(team_value) = snapshot.fields.get("team") {
        let team = team_value
            .as_u64()
            .map(TeamId)
            .and_then(|id| teams.get(id));
        return match team {
            Some(team) => Ok(Some(team.name.clone())),
            None => {
                tracing::warn!(
                    team = %team_value,
                    "archived tagging references a team deleted since it was serialised; skipping"
                );
                Ok(None)
            }
        };
    }
    match snapshot.fields.get("tag_name").and_then(Value::as_str) {
        Some(name) => Ok(Some(name.to_owned())),
        None => Err(RecordError::CorruptArchive(
            "archived tagging has neither a team reference nor a tag_name".into(),
        )),
    }
}

fn episode_of(snapshot: &ArchivedSnapshot) -> RecordResult<EpisodeId> {
    snapshot
        .fields
        .get("episode")
        .and_then(Value::as_u64)
        .map(EpisodeId)
        .ok_or_else(|| RecordError::CorruptArchive("archived tagging has no episode".into()))
}

fn is_tagging(snapshot: &ArchivedSnapshot) -> bool {
    snapshot.kind.as_str() == "tagging"
}

/// Reconstructs, per episode, the set of tag names that ever existed
/// historically. Set semantics: a tag deleted twice appears once.
pub fn historic_tags_for_episodes(
    archive: &DeletedRecordArchive,
    teams: &TeamDirectory,
    episodes: &[EpisodeId],
) -> RecordResult<BTreeMap<EpisodeId, BTreeSet<String>>> {
    let mut historic: BTreeMap<EpisodeId, BTreeSet<String>> = BTreeMap::new();
    for snapshot in archive.entries().iter().filter(|s| is_tagging(s)) {
        let episode = episode_of(snapshot)?;
        if !episodes.contains(&episode) {
            continue;
        }
        if let Some(name) = tag_name_for(snapshot, teams)? {
            historic.entry(episode).or_default().insert(name);
        }
    }
    Ok(historic)
}

/// Episodes that have historically been tagged with the given tag name.
pub fn historic_episodes_for_tag(
    archive: &DeletedRecordArchive,
    teams: &TeamDirectory,
    tag: &str,
) -> RecordResult<BTreeSet<EpisodeId>> {
    let mut episodes = BTreeSet::new();
    for snapshot in archive.entries().iter().filter(|s| is_tagging(s)) {
        if tag_name_for(snapshot, teams)? == Some(tag.to_owned()) {
            episodes.insert(episode_of(snapshot)?);
        }
    }
    Ok(episodes)
}

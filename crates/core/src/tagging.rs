//! Tag reconciliation between episodes and teams.
//!
//! A [`Tagging`] binds an episode to a team, optionally scoped to a specific
//! acting user: the personal `"mine"` tag is a tagging whose user is set and
//! is never shared between users. Reconciliation diffs the episode's current
//! tag set against a requested target set, deleting and creating rows, and
//! then applies the activation rule.
//!
//! This is the one place the engine performs multi-row mutation outside the
//! codec's single-record contract. It does not go through the token check,
//! and concurrent reconciliations of the same episode may interleave;
//! all-or-nothing semantics require an external transaction boundary.

use chrono::{DateTime, Utc};
use serde_json::Value;
use ward_types::ApiName;

use crate::access::Actor;
use crate::archive::{self, DeletedRecordArchive};
use crate::error::{RecordError, RecordResult};
use crate::ids::{EpisodeId, TaggingId, TeamId, UserId};
use crate::registry::Payload;
use crate::store::MemoryStore;
use crate::teams::TeamDirectory;

/// Name of the personal tag.
pub const MINE: &str = "mine";

/// A tagging row: episode-to-team, optionally user-scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagging {
    pub id: TaggingId,
    pub episode: EpisodeId,
    pub team: TeamId,
    /// Set only for personal tags.
    pub user: Option<UserId>,
    pub created: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
}

impl Tagging {
    /// Serialised field snapshot for the deleted-record archive.
    fn snapshot(&self) -> Payload {
        let mut fields = Payload::new();
        fields.insert("episode".into(), Value::from(self.episode.value()));
        fields.insert("team".into(), Value::from(self.team.value()));
        if let Some(user) = self.user {
            fields.insert("user".into(), Value::from(user.value()));
        }
        fields
    }
}

fn tagging_api_name() -> ApiName {
    // Statically valid.
    ApiName::new("tagging").expect("tagging is a valid api name")
}

/// Tag names currently visible to the acting user: team tags plus their own
/// personal tag.
pub fn tag_names(
    store: &MemoryStore,
    teams: &TeamDirectory,
    episode: EpisodeId,
    actor: &Actor,
) -> Vec<String> {
    let mut names = Vec::new();
    for tagging in store.taggings_for_episode(episode) {
        if tagging.user.is_some() && tagging.user != Some(actor.id) {
            continue;
        }
        if let Some(team) = teams.get(tagging.team) {
            if !names.contains(&team.name) {
                names.push(team.name.clone());
            }
        }
    }
    names
}

/// Current tag names merged with every tag the episode ever had
/// historically.
pub fn tag_names_with_historic(
    store: &MemoryStore,
    teams: &TeamDirectory,
    archive: &DeletedRecordArchive,
    episode: EpisodeId,
    actor: &Actor,
) -> RecordResult<Vec<String>> {
    let mut names = tag_names(store, teams, episode, actor);
    let historic = archive::historic_tags_for_episodes(archive, teams, &[episode])?;
    if let Some(past) = historic.get(&episode) {
        for name in past {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    Ok(names)
}

/// The tag-state view merged into episode payloads:
/// `{<team_name>: true, ..., "mine": true?, "id": <episode>}`.
pub fn tagging_view(
    store: &MemoryStore,
    teams: &TeamDirectory,
    episode: EpisodeId,
    actor: &Actor,
) -> Payload {
    let mut view = Payload::new();
    for tagging in store.taggings_for_episode(episode) {
        let Some(team) = teams.get(tagging.team) else {
            continue;
        };
        if team.name == MINE {
            if tagging.user == Some(actor.id) {
                view.insert(MINE.into(), Value::Bool(true));
            }
            continue;
        }
        if tagging.user.is_none() {
            view.insert(team.name.clone(), Value::Bool(true));
        }
    }
    view.insert("id".into(), Value::from(episode.value()));
    view
}

/// Reconciles an episode's tag set against a requested target set.
///
/// 1. Any currently held tag absent from the target set is deleted, with a
///    snapshot appended to the archive.
/// 2. Any target tag absent from the current set is created; a team's parent
///    tag is silently created too when the parent is not itself targeted.
/// 3. The activation rule is applied: an empty target deactivates the
///    episode, any non-empty target (including just `"mine"`) activates it,
///    idempotently.
///
/// # Errors
///
/// Returns [`RecordError::UnknownTeam`] when a target name matches no team,
/// and [`RecordError::NoSuchEpisode`] when the episode does not exist.
pub fn set_tag_names(
    store: &mut MemoryStore,
    teams: &TeamDirectory,
    archive: &mut DeletedRecordArchive,
    episode_id: EpisodeId,
    target: &[String],
    actor: &Actor,
) -> RecordResult<()> {
    let mut episode = store
        .episode(episode_id)
        .ok_or(RecordError::NoSuchEpisode(episode_id.value()))?;

    let current = tag_names(store, teams, episode_id, actor);

    for name in &current {
        if target.contains(name) {
            continue;
        }
        let held = store.taggings_for_episode(episode_id).into_iter().find(|t| {
            teams
                .get(t.team)
                .map(|team| &team.name == name)
                .unwrap_or(false)
                && (name != MINE || t.user == Some(actor.id))
        });
        if let Some(tagging) = held {
            if let Some(removed) = store.remove_tagging(tagging.id) {
                archive.record_delete(tagging_api_name(), removed.snapshot());
            }
        }
    }

    for name in target {
        if current.contains(name) {
            continue;
        }
        let team = teams
            .by_name(name)
            .ok_or_else(|| RecordError::UnknownTeam(name.clone()))?;
        if let Some(parent) = teams.parent_of(team) {
            let parent_targeted = target.contains(&parent.name);
            let parent_held = store
                .taggings_for_episode(episode_id)
                .iter()
                .any(|t| t.team == parent.id && t.user.is_none());
            if !parent_targeted && !parent_held {
                store.insert_tagging(Tagging {
                    id: TaggingId(0),
                    episode: episode_id,
                    team: parent.id,
                    user: None,
                    created: None,
                    created_by: None,
                })?;
            }
        }
        store.insert_tagging(Tagging {
            id: TaggingId(0),
            episode: episode_id,
            team: team.id,
            user: (name == MINE).then_some(actor.id),
            created: Some(Utc::now()),
            created_by: Some(actor.id),
        })?;
    }

    episode.active = !target.is_empty();
    store.update_episode(episode)
}

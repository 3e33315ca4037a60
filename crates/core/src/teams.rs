//! Teams an episode may be tagged to.
//!
//! Teams represent either clinical teams or stages in patient flow. A team
//! may have a parent; tagging a child team implies the ancestor tag. Access
//! to restricted teams is contributed by policy plugins, passed in
//! explicitly.

use std::collections::BTreeMap;

use crate::access::{Actor, PluginRegistry, UserProfile};
use crate::ids::TeamId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    /// Tag name; letters and underscores only by convention.
    pub name: String,
    /// Human-readable title.
    pub title: String,
    pub parent: Option<TeamId>,
    pub active: bool,
    /// Restricted teams are visible only to users a plugin grants them to.
    pub restricted: bool,
    /// Display ordering within team lists.
    pub order: Option<i64>,
}

/// Directory of all teams, live and retired.
#[derive(Debug, Clone, Default)]
pub struct TeamDirectory {
    teams: BTreeMap<TeamId, Team>,
    next_id: u64,
}

impl TeamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut team: Team) -> TeamId {
        self.next_id += 1;
        let id = TeamId(self.next_id);
        team.id = id;
        self.teams.insert(id, team);
        id
    }

    /// Removes a team. Taggings archived before the removal become
    /// unrecoverable for historic reconstruction and are skipped with a
    /// warning there.
    pub fn remove(&mut self, id: TeamId) -> Option<Team> {
        self.teams.remove(&id)
    }

    pub fn get(&self, id: TeamId) -> Option<&Team> {
        self.teams.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Team> {
        self.teams.values().find(|t| t.name == name)
    }

    pub fn parent_of(&self, team: &Team) -> Option<&Team> {
        team.parent.and_then(|id| self.teams.get(&id))
    }

    pub fn has_subteams(&self, id: TeamId) -> bool {
        self.teams.values().any(|t| t.parent == Some(id))
    }

    /// The set of teams this user has access to: active unrestricted teams
    /// in display order, plus plugin-contributed restricted teams,
    /// deduplicated. Users flagged `restricted_only` see only the
    /// plugin-contributed set.
    pub fn for_user(
        &self,
        profile: &UserProfile,
        plugins: &PluginRegistry,
        actor: &Actor,
    ) -> Vec<&Team> {
        let mut teams: Vec<&Team> = Vec::new();
        if !profile.restricted_only {
            let mut open: Vec<&Team> = self
                .teams
                .values()
                .filter(|t| t.active && !t.restricted)
                .collect();
            open.sort_by_key(|t| (t.order, t.id));
            teams.extend(open);
        }
        for name in plugins.restricted_teams(actor) {
            if let Some(team) = self.by_name(&name) {
                if !teams.iter().any(|t| t.id == team.id) {
                    teams.push(team);
                }
            }
        }
        teams
    }
}

/// Convenience constructor used by callers seeding a directory.
impl Team {
    pub fn named(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: TeamId(0),
            name: name.into(),
            title: title.into(),
            parent: None,
            active: true,
            restricted: false,
            order: None,
        }
    }

    pub fn under(mut self, parent: TeamId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn retired(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn ordered(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }
}

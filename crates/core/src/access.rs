//! Actors, user profiles and plugin-contributed policy.
//!
//! Plugins contribute restricted-team lists and role names per user. Their
//! output is treated as opaque name lists, and the registry is an explicit
//! dependency of the components that need it rather than ambient global
//! state.

use std::collections::BTreeMap;

use crate::ids::UserId;

/// The acting user passed through every engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub username: String,
}

impl Actor {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// Externally contributed access policy.
pub trait PolicyPlugin: Send + Sync {
    /// A stable name identifying this plugin as a role source.
    fn name(&self) -> &str;

    /// Names of restricted teams this user may additionally access.
    fn restricted_teams(&self, actor: &Actor) -> Vec<String> {
        let _ = actor;
        Vec::new()
    }

    /// Role names this plugin grants the user.
    fn roles(&self, actor: &Actor) -> Vec<String> {
        let _ = actor;
        Vec::new()
    }
}

/// Aggregates the policy plugins contributed at startup.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn PolicyPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn PolicyPlugin>) {
        self.plugins.push(plugin);
    }

    /// Restricted team names contributed for this user across all plugins.
    pub fn restricted_teams(&self, actor: &Actor) -> Vec<String> {
        let mut teams = Vec::new();
        for plugin in &self.plugins {
            teams.extend(plugin.restricted_teams(actor));
        }
        teams
    }

    /// Role names keyed by contributing plugin.
    pub fn roles(&self, actor: &Actor) -> BTreeMap<String, Vec<String>> {
        let mut roles = BTreeMap::new();
        for plugin in &self.plugins {
            let granted = plugin.roles(actor);
            if !granted.is_empty() {
                roles.insert(plugin.name().to_owned(), granted);
            }
        }
        roles
    }
}

/// Per-user access profile.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    /// The user only sees teams they have been specifically added to.
    pub restricted_only: bool,
    /// Read-only users have no write/edit permissions.
    pub readonly: bool,
    /// Whether the user may download extract data.
    pub can_extract: bool,
    /// Directly assigned role names.
    pub roles: Vec<String>,
}

impl UserProfile {
    /// All roles for this user, keyed by source: plugin contributions plus
    /// the directly assigned `"default"` set.
    pub fn roles_by_source(
        &self,
        plugins: &PluginRegistry,
        actor: &Actor,
    ) -> BTreeMap<String, Vec<String>> {
        let mut roles = plugins.roles(actor);
        roles.insert("default".to_owned(), self.roles.clone());
        roles
    }

    /// Whether this user may see personally-identifying fields. Research
    /// roles only ever see the de-identified extract view.
    pub fn can_see_pid(&self, plugins: &PluginRegistry, actor: &Actor) -> bool {
        !self
            .roles_by_source(plugins, actor)
            .values()
            .flatten()
            .any(|r| r == "researcher" || r == "scientist")
    }

    /// Whether the user is limited to explicitly granted access.
    pub fn explicit_access_only(&self, plugins: &PluginRegistry, actor: &Actor) -> bool {
        self.roles_by_source(plugins, actor)
            .values()
            .flatten()
            .any(|r| r == "scientist")
    }
}

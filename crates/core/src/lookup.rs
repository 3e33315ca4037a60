//! Controlled vocabularies and synonym resolution.
//!
//! A [`LookupList`] is a named vocabulary of entries, each optionally aliased
//! by synonyms. Synonym names are unique within their list. Resolution
//! accepts an entry's own name or any of its synonyms; a request that cannot
//! be fully accounted for fails with the offending values named.

use std::collections::BTreeMap;

use ward_types::ApiName;

use crate::error::{RecordError, RecordResult};
use crate::ids::EntryId;

/// One controlled-vocabulary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntry {
    pub id: EntryId,
    pub name: String,
}

/// A named controlled vocabulary.
#[derive(Debug, Clone)]
pub struct LookupList {
    name: ApiName,
    entries: Vec<LookupEntry>,
    /// Synonym name -> aliased entry. Unique together with the list identity.
    synonyms: BTreeMap<String, EntryId>,
    next_id: u64,
}

impl LookupList {
    pub fn new(name: ApiName) -> Self {
        Self {
            name,
            entries: Vec::new(),
            synonyms: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn name(&self) -> &ApiName {
        &self.name
    }

    /// Adds an entry to the vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::InvalidInput`] if an entry with that name
    /// already exists.
    pub fn insert(&mut self, name: impl Into<String>) -> RecordResult<EntryId> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(RecordError::InvalidInput(format!(
                "duplicate lookup entry {name:?} in list {}",
                self.name
            )));
        }
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(LookupEntry { id, name });
        Ok(id)
    }

    /// Aliases an existing entry with a synonym.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::DuplicateSynonym`] when the synonym name is
    /// already taken within this list, or [`RecordError::InvalidInput`] when
    /// the entry does not exist.
    pub fn add_synonym(&mut self, entry: EntryId, name: impl Into<String>) -> RecordResult<()> {
        let name = name.into();
        if self.entry(entry).is_none() {
            return Err(RecordError::InvalidInput(format!(
                "no entry {entry} in lookup list {}",
                self.name
            )));
        }
        if self.synonyms.contains_key(&name) {
            return Err(RecordError::DuplicateSynonym {
                list: self.name.clone(),
                name,
            });
        }
        self.synonyms.insert(name, entry);
        Ok(())
    }

    pub fn entry(&self, id: EntryId) -> Option<&LookupEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Resolves a single value by entry name, falling back to synonyms.
    pub fn find(&self, text: &str) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|e| e.name == text)
            .map(|e| e.id)
            .or_else(|| self.synonyms.get(text).copied())
    }

    fn synonyms_of(&self, id: EntryId) -> impl Iterator<Item = &str> {
        self.synonyms
            .iter()
            .filter(move |(_, entry)| **entry == id)
            .map(|(name, _)| name.as_str())
    }

    /// Resolves a set of requested names to vocabulary entries.
    ///
    /// An entry matches when its own name or one of its synonyms appears in
    /// `requested`. If the resolved set is smaller than the request, the gap
    /// is accepted silently (logged) when every missing slot is explained by
    /// a synonym substitution; otherwise the unaccounted values are rejected.
    ///
    /// Resolution is idempotent: the same request always yields the same set.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::UnknownValues`] naming exactly the values that
    /// neither an entry name nor a synonym of a resolved entry accounts for.
    pub fn resolve_names(&self, requested: &[String]) -> RecordResult<Vec<EntryId>> {
        let matched: Vec<EntryId> = self
            .entries
            .iter()
            .filter(|e| {
                requested.iter().any(|name| *name == e.name)
                    || self.synonyms_of(e.id).any(|s| requested.iter().any(|n| n == s))
            })
            .map(|e| e.id)
            .collect();

        if matched.len() != requested.len() {
            let accounted = |name: &str| {
                matched.iter().any(|id| {
                    self.entry(*id)
                        .map(|e| e.name == name)
                        .unwrap_or(false)
                        || self.synonyms_of(*id).any(|s| s == name)
                })
            };
            let unaccounted: Vec<String> = requested
                .iter()
                .filter(|name| !accounted(name))
                .cloned()
                .collect();
            if unaccounted.is_empty() {
                tracing::info!(
                    list = %self.name,
                    "synonym substitution accounted for a smaller resolved set"
                );
            } else {
                tracing::error!(
                    list = %self.name,
                    values = ?unaccounted,
                    "lookup resolution failed"
                );
                return Err(RecordError::UnknownValues(unaccounted));
            }
        }

        Ok(matched)
    }
}

/// Registry of controlled vocabularies, keyed by API name.
#[derive(Debug, Clone, Default)]
pub struct LookupRegistry {
    lists: BTreeMap<ApiName, LookupList>,
}

impl LookupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty vocabulary and returns a mutable handle to populate
    /// it.
    pub fn create(&mut self, name: ApiName) -> &mut LookupList {
        self.lists
            .entry(name.clone())
            .or_insert_with(|| LookupList::new(name))
    }

    pub fn get_mut(&mut self, name: &ApiName) -> Option<&mut LookupList> {
        self.lists.get_mut(name)
    }

    /// Fetches a vocabulary a registered field schema refers to.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Schema`] when the list was never created:
    /// schemas refer to vocabularies statically, so a miss is a registration
    /// bug.
    pub fn get(&self, name: &ApiName) -> RecordResult<&LookupList> {
        self.lists
            .get(name)
            .ok_or_else(|| RecordError::Schema(format!("lookup list {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn organisms() -> LookupList {
        let mut list = LookupList::new(ApiName::new("microbiology_organism").unwrap());
        let e_coli = list.insert("E. coli").expect("insert should succeed");
        list.insert("S. aureus").expect("insert should succeed");
        list.add_synonym(e_coli, "Ecoli")
            .expect("synonym should be accepted");
        list
    }

    #[test]
    fn test_synonym_resolves_to_canonical_entry() {
        let list = organisms();
        let resolved = list
            .resolve_names(&["Ecoli".into()])
            .expect("synonym should resolve");
        assert_eq!(resolved.len(), 1);
        assert_eq!(list.entry(resolved[0]).unwrap().name, "E. coli");
    }

    #[test]
    fn test_unknown_value_names_only_the_offender() {
        let list = organisms();
        let err = list
            .resolve_names(&["Ecoli".into(), "Totally Unknown".into()])
            .expect_err("unknown value should fail");
        match err {
            RecordError::UnknownValues(values) => {
                assert_eq!(values, vec!["Totally Unknown".to_string()]);
            }
            other => panic!("expected UnknownValues, got {other:?}"),
        }
    }

    #[test]
    fn test_synonym_overlap_is_accepted_silently() {
        let list = organisms();
        // Canonical name and its own synonym collapse onto one entry.
        let resolved = list
            .resolve_names(&["E. coli".into(), "Ecoli".into()])
            .expect("synonym overlap should be accepted");
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let list = organisms();
        let request = vec!["Ecoli".to_string(), "S. aureus".to_string()];
        let first = list.resolve_names(&request).expect("should resolve");
        let second = list.resolve_names(&request).expect("should resolve");
        assert_eq!(first, second);
    }

    #[test]
    fn test_find_prefers_entry_name_over_synonym() {
        let mut list = organisms();
        let aureus = list.find("S. aureus").unwrap();
        // A synonym spelled like another entry's name must not shadow it.
        list.add_synonym(aureus, "Escherichia")
            .expect("synonym should be accepted");
        assert_eq!(list.entry(list.find("E. coli").unwrap()).unwrap().name, "E. coli");
        assert_eq!(
            list.entry(list.find("Escherichia").unwrap()).unwrap().name,
            "S. aureus"
        );
    }

    #[test]
    fn test_duplicate_synonym_is_rejected() {
        let mut list = organisms();
        let aureus = list.find("S. aureus").unwrap();
        let err = list
            .add_synonym(aureus, "Ecoli")
            .expect_err("duplicate synonym should be rejected");
        assert!(matches!(err, RecordError::DuplicateSynonym { .. }));
    }

    #[test]
    fn test_missing_list_is_a_schema_error() {
        let registry = LookupRegistry::new();
        let err = registry
            .get(&ApiName::new("condition").unwrap())
            .expect_err("missing list should fail");
        assert!(matches!(err, RecordError::Schema(_)));
    }
}

// ABOUTME: Identity mapping between internal session ids and client-facing public ids
// ABOUTME: Bidirectional maps with idempotent minting for sessions and per-session files

use std::collections::HashMap;

/// Bidirectional map between an underlying value and the public id minted for it
#[derive(Debug, Default, Clone)]
pub struct IdMap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the public id for `key`, minting one with `mint` on first use.
    ///
    /// Minting is retried until the candidate does not collide with an id
    /// already handed out, so two keys never share a public id.
    pub fn get_or_mint<F>(&mut self, key: &str, mut mint: F) -> String
    where
        F: FnMut() -> String,
    {
        if let Some(existing) = self.forward.get(key) {
            return existing.clone();
        }

        let mut candidate = mint();
        while self.reverse.contains_key(&candidate) {
            candidate = mint();
        }

        self.forward.insert(key.to_string(), candidate.clone());
        self.reverse.insert(candidate.clone(), key.to_string());
        candidate
    }

    /// Public id already minted for `key`, if any
    pub fn public_id(&self, key: &str) -> Option<&str> {
        self.forward.get(key).map(String::as_str)
    }

    /// Underlying value for a public id, if known
    pub fn resolve(&self, public_id: &str) -> Option<&str> {
        self.reverse.get(public_id).map(String::as_str)
    }

    /// Drop the mapping for `key`, returning the public id it had
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let public_id = self.forward.remove(key)?;
        self.reverse.remove(&public_id);
        Some(public_id)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Session and file identity mappings.
///
/// File ids are namespaced by the session's public id, so they disappear
/// together with the session mapping.
#[derive(Debug, Default)]
pub struct IdentityTable {
    sessions: IdMap,
    files: HashMap<String, IdMap>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public_session_id<F>(&mut self, internal_id: &str, mint: F) -> String
    where
        F: FnMut() -> String,
    {
        self.sessions.get_or_mint(internal_id, mint)
    }

    /// Internal id for a known public id; `None` for unknown ids
    pub fn internal_session_id(&self, public_id: &str) -> Option<&str> {
        self.sessions.resolve(public_id)
    }

    /// Public file id for `filename` within the session, minted on first use
    pub fn file_id<F>(&mut self, internal_id: &str, filename: &str, mint: F) -> String
    where
        F: FnMut() -> String,
    {
        let public_session = self
            .sessions
            .get_or_mint(internal_id, crate::ids::generate_public_id);

        self.files
            .entry(public_session)
            .or_default()
            .get_or_mint(filename, mint)
    }

    /// Real filename behind a file id within the session
    pub fn filename(&self, internal_id: &str, file_id: &str) -> Option<&str> {
        let public_session = self.sessions.public_id(internal_id)?;
        self.files.get(public_session)?.resolve(file_id)
    }

    /// Remove every mapping belonging to `internal_id`
    pub fn remove_session(&mut self, internal_id: &str) {
        if let Some(public_session) = self.sessions.remove(internal_id) {
            self.files.remove(&public_session);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::generate_public_id;

    #[test]
    fn test_get_or_mint_is_idempotent() {
        let mut map = IdMap::new();
        let first = map.get_or_mint("session-a", generate_public_id);
        let second = map.get_or_mint("session-a", generate_public_id);

        assert_eq!(first, second);
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve(&first), Some("session-a"));
    }

    #[test]
    fn test_distinct_keys_get_distinct_ids() {
        let mut map = IdMap::new();
        let a = map.get_or_mint("a", generate_public_id);
        let b = map.get_or_mint("b", generate_public_id);
        assert_ne!(a, b);
    }

    #[test]
    fn test_collision_is_reminted() {
        let mut map = IdMap::new();
        let mut candidates = vec!["dup".to_string(), "dup".to_string(), "fresh".to_string()]
            .into_iter();

        let a = map.get_or_mint("a", || candidates.next().unwrap());
        let b = map.get_or_mint("b", || candidates.next().unwrap());

        assert_eq!(a, "dup");
        assert_eq!(b, "fresh");
        assert_eq!(map.resolve("dup"), Some("a"));
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let mut map = IdMap::new();
        let public = map.get_or_mint("a", generate_public_id);

        assert_eq!(map.remove("a"), Some(public.clone()));
        assert!(map.resolve(&public).is_none());
        assert!(map.public_id("a").is_none());
        assert!(map.remove("a").is_none());
    }

    #[test]
    fn test_file_ids_are_scoped_per_session() {
        let mut table = IdentityTable::new();
        let f1 = table.file_id("s1", "out.csv", generate_public_id);
        let f1_again = table.file_id("s1", "out.csv", generate_public_id);
        let f2 = table.file_id("s2", "out.csv", generate_public_id);

        assert_eq!(f1, f1_again);
        assert_ne!(f1, f2);
        assert_eq!(table.filename("s1", &f1), Some("out.csv"));
        assert_eq!(table.filename("s2", &f1), None);
    }

    #[test]
    fn test_remove_session_drops_files() {
        let mut table = IdentityTable::new();
        let public = table.public_session_id("s1", generate_public_id);
        let file = table.file_id("s1", "plot.png", generate_public_id);

        table.remove_session("s1");

        assert!(table.internal_session_id(&public).is_none());
        assert!(table.filename("s1", &file).is_none());
        assert_eq!(table.session_count(), 0);
    }
}

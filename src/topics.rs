//! Topic name to topic id mappings.

use std::collections::HashMap;

/// Bidirectional map between topic names and negotiated topic ids.
#[derive(Debug, Default, Clone)]
pub struct TopicRegistry {
    by_name: HashMap<String, u16>,
    by_id: HashMap<u16, String>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` maps to `id`, replacing any older mapping of
    /// either side.
    pub fn insert(&mut self, name: &str, id: u16) {
        if let Some(old_id) = self.by_name.remove(name) {
            self.by_id.remove(&old_id);
        }
        if let Some(old_name) = self.by_id.remove(&id) {
            self.by_name.remove(&old_name);
        }
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
    }

    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: u16) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Remove the mapping for `id`. Returns the topic name if it existed.
    pub fn remove_id(&mut self, id: u16) -> Option<String> {
        let name = self.by_id.remove(&id)?;
        self.by_name.remove(&name);
        Some(name)
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// True if `name` contains a `+` or `#` wildcard.
pub fn has_wildcard(name: &str) -> bool {
    name.contains(|c| c == '+' || c == '#')
}

/// Two-character names without wildcards travel in the topic id field.
pub fn as_short_name(name: &str) -> Option<[u8; 2]> {
    match name.as_bytes() {
        [a, b] if !has_wildcard(name) => Some([*a, *b]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut topics = TopicRegistry::new();
        topics.insert("a/b", 1);
        topics.insert("c/d", 2);

        assert_eq!(topics.id_of("a/b"), Some(1));
        assert_eq!(topics.name_of(2), Some("c/d"));
        assert_eq!(topics.len(), 2);
    }

    #[test]
    fn test_insert_replaces_both_sides() {
        let mut topics = TopicRegistry::new();
        topics.insert("a/b", 1);
        topics.insert("a/b", 5);
        assert_eq!(topics.name_of(1), None);
        assert_eq!(topics.id_of("a/b"), Some(5));

        topics.insert("x", 5);
        assert_eq!(topics.id_of("a/b"), None);
        assert_eq!(topics.name_of(5), Some("x"));
        assert_eq!(topics.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut topics = TopicRegistry::new();
        topics.insert("a/b", 1);
        topics.insert("c", 2);

        assert_eq!(topics.remove_id(1).as_deref(), Some("a/b"));
        assert_eq!(topics.remove_id(1), None);
        assert_eq!(topics.id_of("a/b"), None);

        topics.clear();
        assert!(topics.is_empty());
    }

    #[test]
    fn test_short_names() {
        assert_eq!(as_short_name("ab"), Some(*b"ab"));
        assert_eq!(as_short_name("a+"), None);
        assert_eq!(as_short_name("abc"), None);
        assert_eq!(as_short_name("a"), None);
        assert!(has_wildcard("x/#"));
        assert!(!has_wildcard("x/y"));
    }
}

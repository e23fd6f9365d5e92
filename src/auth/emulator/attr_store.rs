use std::collections::HashMap;

use crate::config::EmulatorConfig;

/// Read-only map of emulated identities to their attributes.
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    users: HashMap<String, HashMap<String, String>>,
}

impl AttributeStore {
    pub fn new(users: HashMap<String, HashMap<String, String>>) -> Self {
        Self { users }
    }

    pub fn from_config(config: &EmulatorConfig) -> Self {
        Self::new(config.users.clone())
    }

    /// Attributes of `identity`, if it is a known user.
    pub fn fetch(&self, identity: &str) -> Option<&HashMap<String, String>> {
        self.users.get(identity)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch() {
        let store = AttributeStore::new(HashMap::from([(
            "jdoe".to_string(),
            HashMap::from([("mail".to_string(), "jdoe@example.edu".to_string())]),
        )]));

        assert_eq!(store.fetch("jdoe").unwrap()["mail"], "jdoe@example.edu");
        assert!(store.fetch("JDOE").is_none());
        assert!(store.fetch("").is_none());
        assert_eq!(store.len(), 1);
    }
}

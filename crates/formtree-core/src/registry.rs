#![forbid(unsafe_code)]

//! Ordered key → node map backing a group.

use indexmap::IndexMap;

use crate::node::FormNode;

/// Children of a group, in insertion order.
///
/// Deleting a key keeps the relative order of the remaining entries.
#[derive(Clone, Default)]
pub struct FieldRegistry {
    entries: IndexMap<String, FormNode>,
}

impl FieldRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced key keeps its position.
    pub fn set(&mut self, key: impl Into<String>, node: FormNode) -> Option<FormNode> {
        self.entries.insert(key.into(), node)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FormNode> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> Option<FormNode> {
        self.entries.shift_remove(key)
    }

    pub fn for_each(&self, mut f: impl FnMut(&str, &FormNode)) {
        for (key, node) in &self.entries {
            f(key, node);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &FormNode> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormNode)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Owned `(key, node)` pairs; node handles are cheap clones.
    #[must_use]
    pub fn to_vec(&self) -> Vec<(String, FormNode)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn as_map(&self) -> &IndexMap<String, FormNode> {
        &self.entries
    }
}

impl std::fmt::Debug for FieldRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use crate::node::{FieldNode, FormNode};
    use proptest::prelude::*;

    fn leaf(v: i64) -> FormNode {
        FormNode::Field(FieldNode::new(&FieldConfig::new(v)))
    }

    #[test]
    fn preserves_insertion_order_across_delete() {
        let mut reg = FieldRegistry::new();
        reg.set("a", leaf(1));
        reg.set("b", leaf(2));
        reg.set("c", leaf(3));
        assert!(reg.delete("b").is_some());
        assert_eq!(reg.keys().collect::<Vec<_>>(), ["a", "c"]);
        assert!(!reg.has("b"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut reg = FieldRegistry::new();
        reg.set("a", leaf(1));
        reg.set("b", leaf(2));
        let old = reg.set("a", leaf(9));
        assert!(old.is_some());
        assert_eq!(reg.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(reg.get("a").map(FormNode::value), Some(serde_json::json!(9)));
    }

    proptest! {
        #[test]
        fn order_matches_reference(ops in proptest::collection::vec((0u8..6, any::<bool>()), 0..40)) {
            let mut reg = FieldRegistry::new();
            let mut reference: Vec<String> = Vec::new();
            for (k, insert) in ops {
                let key = format!("k{k}");
                if insert {
                    if !reference.contains(&key) {
                        reference.push(key.clone());
                    }
                    reg.set(key, leaf(i64::from(k)));
                } else {
                    reference.retain(|r| r != &key);
                    reg.delete(&key);
                }
            }
            let keys: Vec<String> = reg.keys().map(str::to_string).collect();
            prop_assert_eq!(keys, reference);
        }
    }
}

//! # Disjoint Set Union over Entity IDs
//!
//! Union-Find over raw entity IDs backing the resolver's canonicalization.
//! Each component carries a canonical ID: its lexicographically smallest member.
//! The canonical ID is therefore independent of union order.

use rustc_hash::FxHashMap;

/// Union-Find with path halving and union by rank.
#[derive(Debug, Clone, Default)]
pub struct IdentityDsu {
    /// Parent pointers - uses FxHashMap for faster hashing
    parent: FxHashMap<String, String>,
    /// Rank per root for union by rank
    rank: FxHashMap<String, u32>,
    /// Canonical (smallest) member per root
    canonical: FxHashMap<String, String>,
    /// Members per root, merged smaller-into-larger on union
    members: FxHashMap<String, Vec<String>>,
    /// Number of disjoint components among tracked IDs
    component_count: usize,
}

impl IdentityDsu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an ID as a singleton component if it is not known yet.
    pub fn add(&mut self, id: &str) {
        if self.parent.contains_key(id) {
            return;
        }
        self.parent.insert(id.to_string(), id.to_string());
        self.rank.insert(id.to_string(), 0);
        self.canonical.insert(id.to_string(), id.to_string());
        self.members.insert(id.to_string(), vec![id.to_string()]);
        self.component_count += 1;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parent.contains_key(id)
    }

    /// Number of tracked IDs.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn num_components(&self) -> usize {
        self.component_count
    }

    /// Find the root of an ID (with path compression via path halving).
    /// Returns `None` for untracked IDs.
    pub fn find(&mut self, id: &str) -> Option<String> {
        if !self.parent.contains_key(id) {
            return None;
        }
        let mut node = id.to_string();
        loop {
            let parent = self.parent.get(&node).cloned().unwrap_or_else(|| node.clone());
            if parent == node {
                return Some(node);
            }
            let grandparent = self
                .parent
                .get(&parent)
                .cloned()
                .unwrap_or_else(|| parent.clone());
            if grandparent == parent {
                return Some(parent);
            }
            // Path halving: point node at its grandparent and continue from there
            self.parent.insert(node, grandparent.clone());
            node = grandparent;
        }
    }

    /// Canonical ID of the component containing `id`; untracked IDs are their
    /// own canonical ID.
    pub fn canonical(&mut self, id: &str) -> String {
        match self.find(id) {
            Some(root) => self
                .canonical
                .get(&root)
                .cloned()
                .unwrap_or(root),
            None => id.to_string(),
        }
    }

    pub fn same_component(&mut self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        match (self.find(a), self.find(b)) {
            (Some(root_a), Some(root_b)) => root_a == root_b,
            _ => false,
        }
    }

    /// Merge the components of `a` and `b`, returning the resulting canonical ID.
    pub fn union(&mut self, a: &str, b: &str) -> String {
        self.add(a);
        self.add(b);
        let root_a = self.find(a).unwrap_or_else(|| a.to_string());
        let root_b = self.find(b).unwrap_or_else(|| b.to_string());
        if root_a == root_b {
            return self.canonical(&root_a);
        }

        let canonical_a = self.canonical.remove(&root_a).unwrap_or_else(|| root_a.clone());
        let canonical_b = self.canonical.remove(&root_b).unwrap_or_else(|| root_b.clone());
        let canonical = canonical_a.min(canonical_b);

        let rank_a = self.rank.get(&root_a).copied().unwrap_or(0);
        let rank_b = self.rank.get(&root_b).copied().unwrap_or(0);
        let (new_root, old_root) = if rank_a < rank_b {
            (root_b, root_a)
        } else {
            if rank_a == rank_b {
                self.rank.insert(root_a.clone(), rank_a + 1);
            }
            (root_a, root_b)
        };
        self.parent.insert(old_root.clone(), new_root.clone());
        self.rank.remove(&old_root);

        let mut absorbed = self.members.remove(&old_root).unwrap_or_default();
        let mut kept = self.members.remove(&new_root).unwrap_or_default();
        if kept.len() < absorbed.len() {
            std::mem::swap(&mut kept, &mut absorbed);
        }
        kept.extend(absorbed);
        self.members.insert(new_root.clone(), kept);

        self.canonical.insert(new_root, canonical.clone());
        self.component_count -= 1;
        canonical
    }

    /// All tracked members of the component containing `id`, sorted.
    pub fn members(&mut self, id: &str) -> Vec<String> {
        let Some(root) = self.find(id) else {
            return vec![id.to_string()];
        };
        let mut members = self.members.get(&root).cloned().unwrap_or_default();
        members.sort();
        members
    }

    /// Group every tracked ID by canonical ID.
    pub fn components(&self) -> Vec<(String, Vec<String>)> {
        let mut components: Vec<(String, Vec<String>)> = self
            .members
            .iter()
            .map(|(root, members)| {
                let canonical = self.canonical.get(root).cloned().unwrap_or_else(|| root.clone());
                let mut members = members.clone();
                members.sort();
                (canonical, members)
            })
            .collect();
        components.sort();
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untracked_ids_are_self_canonical() {
        let mut dsu = IdentityDsu::new();
        assert_eq!(dsu.find("x"), None);
        assert_eq!(dsu.canonical("x"), "x");
        assert!(dsu.same_component("x", "x"));
        assert!(!dsu.same_component("x", "y"));
    }

    #[test]
    fn test_union_picks_smallest_member() {
        let mut dsu = IdentityDsu::new();
        assert_eq!(dsu.union("c", "b"), "b");
        assert_eq!(dsu.union("d", "c"), "b");
        assert_eq!(dsu.union("a", "z"), "a");
        assert_eq!(dsu.num_components(), 2);
        assert_eq!(dsu.union("z", "d"), "a");
        for id in ["a", "b", "c", "d", "z"] {
            assert_eq!(dsu.canonical(id), "a");
        }
        assert_eq!(dsu.num_components(), 1);
    }

    #[test]
    fn test_canonical_is_order_independent() {
        let pairs = [("q", "r"), ("r", "s"), ("p", "s"), ("t", "u")];
        let mut forward = IdentityDsu::new();
        for (a, b) in pairs {
            forward.union(a, b);
        }
        let mut backward = IdentityDsu::new();
        for (a, b) in pairs.iter().rev() {
            backward.union(b, a);
        }
        for id in ["p", "q", "r", "s", "t", "u"] {
            assert_eq!(forward.canonical(id), backward.canonical(id));
        }
        assert_eq!(forward.canonical("s"), "p");
        assert_eq!(forward.canonical("u"), "t");
    }

    #[test]
    fn test_long_chain_compresses() {
        let mut dsu = IdentityDsu::new();
        let ids: Vec<String> = (0..200).map(|i| format!("id{:04}", i)).collect();
        for window in ids.windows(2) {
            dsu.union(&window[0], &window[1]);
        }
        assert_eq!(dsu.canonical("id0199"), "id0000");
        assert_eq!(dsu.members("id0100").len(), 200);
        assert_eq!(dsu.components().len(), 1);
    }
}

// Wire resolution - merging wire declarations into channel groups

//! # Wire Resolver
//!
//! Each endpoint name (`gadget.Pin`, after label resolution) is a node. Every
//! declared wire merges its `from` and `to` nodes into one set, using a
//! disjoint-set (union-find) structure. Each final set becomes one wire group,
//! i.e. one concrete channel.
//!
//! ## Capacity Rule
//!
//! ```text
//! capacity(group) = max( max(declared capacity of every wire in the group),
//!                        number of feed messages aimed at any pin in the group )
//! ```
//!
//! Feeds only ever grow a group, and raising any single declared capacity can
//! never shrink the result.
//!
//! ## Rust Learning Notes:
//!
//! ### Path Compression and Union by Rank
//! `find` re-points every node it walks past directly at the root, and `union`
//! hangs the shallower tree under the deeper one. Together they keep the trees
//! almost flat, so both operations are effectively constant time.

use std::collections::{BTreeMap, HashMap};

use crate::WireEntry;

/// Union-find over string keys
#[derive(Debug, Default, Clone)]
pub struct DisjointSet {
    parent: HashMap<String, String>,
    rank: HashMap<String, usize>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `key` exists as (at least) a singleton set
    pub fn insert(&mut self, key: &str) {
        if !self.parent.contains_key(key) {
            self.parent.insert(key.to_string(), key.to_string());
            self.rank.insert(key.to_string(), 0);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.parent.contains_key(key)
    }

    /// Representative of the set containing `key`; inserts unknown keys
    pub fn find(&mut self, key: &str) -> String {
        self.insert(key);

        let mut root = key.to_string();
        while let Some(parent) = self.parent.get(&root) {
            if *parent == root {
                break;
            }
            root = parent.clone();
        }

        // path compression
        let mut node = key.to_string();
        while node != root {
            let next = self.parent.insert(node.clone(), root.clone());
            match next {
                Some(next) => node = next,
                None => break,
            }
        }

        root
    }

    /// Merge the sets of `a` and `b`, returning the new representative
    pub fn union(&mut self, a: &str, b: &str) -> String {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }

        let rank_a = self.rank.get(&ra).copied().unwrap_or(0);
        let rank_b = self.rank.get(&rb).copied().unwrap_or(0);
        let (root, child) = if rank_a >= rank_b { (ra, rb) } else { (rb, ra) };
        if rank_a == rank_b {
            *self.rank.entry(root.clone()).or_insert(0) += 1;
        }
        self.parent.insert(child, root.clone());
        root
    }

    /// All sets, each sorted, ordered by their first member
    pub fn sets(&mut self) -> Vec<Vec<String>> {
        let keys: Vec<String> = self.parent.keys().cloned().collect();
        let mut by_root: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in keys {
            let root = self.find(&key);
            by_root.entry(root).or_default().push(key);
        }
        let mut sets: Vec<Vec<String>> = by_root
            .into_values()
            .map(|mut members| {
                members.sort();
                members
            })
            .collect();
        sets.sort();
        sets
    }
}

/// Declared wires, de-duplicated by `(from, to)`, in declaration order
#[derive(Debug, Default, Clone)]
pub struct WireSet {
    wires: Vec<WireEntry>,
    index: HashMap<(String, String), usize>,
}

impl WireSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a wire; re-declaring a pair keeps the larger capacity
    ///
    /// Returns `true` when the pair was not known before.
    pub fn declare(&mut self, from: &str, to: &str, capacity: usize) -> bool {
        let key = (from.to_string(), to.to_string());
        match self.index.get(&key) {
            Some(&i) => {
                let wire = &mut self.wires[i];
                wire.capacity = wire.capacity.max(capacity);
                false
            }
            None => {
                self.index.insert(key, self.wires.len());
                self.wires.push(WireEntry {
                    from: from.to_string(),
                    to: to.to_string(),
                    capacity,
                });
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WireEntry> {
        self.wires.iter()
    }

    pub fn len(&self) -> usize {
        self.wires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wires.is_empty()
    }

    pub fn to_vec(&self) -> Vec<WireEntry> {
        self.wires.clone()
    }
}

/// One resolved group before its channel is allocated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGroup {
    /// Every endpoint that shares the channel, sorted
    pub members: Vec<String>,
    /// Required buffering (0 = no buffering requested)
    pub capacity: usize,
    /// Feed messages aimed at members of this group
    pub feeds: usize,
}

impl PlannedGroup {
    /// Name used for the channel in logs: the first member
    pub fn name(&self) -> &str {
        self.members.first().map(String::as_str).unwrap_or("")
    }
}

/// Resolve wire endpoint names (already label-resolved) into groups
///
/// `feeds` maps an endpoint to the number of messages pre-loaded into it.
pub fn plan_groups<'a, I>(wires: I, feeds: &HashMap<String, usize>) -> Vec<PlannedGroup>
where
    I: IntoIterator<Item = (&'a str, &'a str, usize)>,
{
    let mut sets = DisjointSet::new();
    let mut declared: Vec<(String, usize)> = Vec::new();

    for (from, to, capacity) in wires {
        sets.union(from, to);
        declared.push((to.to_string(), capacity));
    }
    for pin in feeds.keys() {
        sets.insert(pin);
    }

    let mut capacity_by_root: HashMap<String, usize> = HashMap::new();
    for (to, capacity) in declared {
        let root = sets.find(&to);
        let entry = capacity_by_root.entry(root).or_insert(0);
        *entry = (*entry).max(capacity);
    }

    let mut feeds_by_root: HashMap<String, usize> = HashMap::new();
    for (pin, count) in feeds {
        let root = sets.find(pin);
        *feeds_by_root.entry(root).or_insert(0) += count;
    }

    sets.sets()
        .into_iter()
        .map(|members| {
            let root = sets.find(&members[0]);
            let declared = capacity_by_root.get(&root).copied().unwrap_or(0);
            let feeds = feeds_by_root.get(&root).copied().unwrap_or(0);
            PlannedGroup {
                capacity: declared.max(feeds),
                feeds,
                members,
            }
        })
        .collect()
}

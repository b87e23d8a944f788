/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-memory cluster topology for one scheduling attempt.
//!
//! ```text
//! multi-superpod ──► superpod (super_pod_id) ──► rack (rack_id) ──► node
//!                                          └──► UB-memory domain (ub_mem_id) ──► node
//! ```
//!
//! [`Topology`] is built from the node snapshot once per attempt and never
//! mutated afterwards.  Strategies track the nodes they have consumed in their
//! own `used` set and ask the topology for the *remaining* groups, so the same
//! snapshot can be shared by every strategy in the escalation chain.
//!
//! [`SuperPodOrderTable`] buckets superpods by how much room they have left:
//! row = whole tp-blocks available, column = leftover nodes that do not form a
//! whole tp-block.  Walking the table top-left first visits the fullest
//! superpods (tight packing); walking it bottom-right first visits the
//! emptiest ones (spreading).

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::job::SuperNode;

// ── Node ──────────────────────────────────────────────────────────────────────

/// Placement-relevant identity of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBaseInfo {
    pub name: String,
    pub super_pod_id: i32,
    pub rack_id: i32,
    pub ub_mem_id: Option<i32>,
}

impl NodeBaseInfo {
    pub fn new(name: impl Into<String>, super_pod_id: i32, rack_id: i32) -> Self {
        Self {
            name: name.into(),
            super_pod_id,
            rack_id,
            ub_mem_id: None,
        }
    }

    pub fn to_super_node(&self) -> SuperNode {
        SuperNode {
            name: self.name.clone(),
            super_pod_id: self.super_pod_id,
            rack_id: self.rack_id,
        }
    }
}

impl From<&SuperNode> for NodeBaseInfo {
    fn from(n: &SuperNode) -> Self {
        NodeBaseInfo::new(n.name.clone(), n.super_pod_id, n.rack_id)
    }
}

/// Node name → node, all sharing one `super_pod_id`.
pub type SuperPod = BTreeMap<String, NodeBaseInfo>;

// ── Affinity groups ───────────────────────────────────────────────────────────

/// Which attribute groups nodes inside a superpod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Rack,
    UbMem,
}

impl GroupKey {
    fn of(self, node: &NodeBaseInfo) -> Option<i32> {
        match self {
            GroupKey::Rack => Some(node.rack_id),
            GroupKey::UbMem => node.ub_mem_id,
        }
    }
}

/// Free nodes of one rack (or UB-memory domain) inside one superpod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroup {
    pub id: i32,
    /// Sorted by node name.
    pub nodes: Vec<NodeBaseInfo>,
}

impl NodeGroup {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whole tp-blocks this group can supply.
    pub fn tp_block_num(&self, tp_block: usize) -> usize {
        if tp_block == 0 {
            0
        } else {
            self.nodes.len() / tp_block
        }
    }
}

// ── Topology ──────────────────────────────────────────────────────────────────

/// Superpod id → [`SuperPod`] for every schedulable node of the cycle.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    super_pods: BTreeMap<i32, SuperPod>,
}

impl Topology {
    pub fn build(nodes: impl IntoIterator<Item = NodeBaseInfo>) -> Self {
        let mut super_pods: BTreeMap<i32, SuperPod> = BTreeMap::new();
        for node in nodes {
            super_pods
                .entry(node.super_pod_id)
                .or_default()
                .insert(node.name.clone(), node);
        }
        debug!(
            super_pods = super_pods.len(),
            nodes = super_pods.values().map(|sp| sp.len()).sum::<usize>(),
            "topology built"
        );
        Self { super_pods }
    }

    pub fn super_pods(&self) -> &BTreeMap<i32, SuperPod> {
        &self.super_pods
    }

    pub fn super_pod(&self, id: i32) -> Option<&SuperPod> {
        self.super_pods.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.super_pods.values().map(|sp| sp.len()).sum()
    }

    /// Free groups of superpod `super_pod_id`, ascending by free node count
    /// (ties broken by group id).  Nodes without the grouping attribute and
    /// nodes in `used` are left out; empty groups are dropped.
    pub fn groups(&self, super_pod_id: i32, key: GroupKey, used: &BTreeSet<String>) -> Vec<NodeGroup> {
        let Some(sp) = self.super_pods.get(&super_pod_id) else {
            return vec![];
        };

        let mut by_id: BTreeMap<i32, Vec<NodeBaseInfo>> = BTreeMap::new();
        for node in sp.values() {
            if used.contains(&node.name) {
                continue;
            }
            if let Some(id) = key.of(node) {
                by_id.entry(id).or_default().push(node.clone());
            }
        }

        let mut groups: Vec<NodeGroup> = by_id
            .into_iter()
            .map(|(id, nodes)| NodeGroup { id, nodes })
            .collect();
        groups.sort_by_key(|g| (g.len(), g.id));
        groups
    }

    /// Free nodes of a superpod, group by group in ascending group size.
    pub fn free_nodes(&self, super_pod_id: i32, key: GroupKey, used: &BTreeSet<String>) -> Vec<NodeBaseInfo> {
        self.groups(super_pod_id, key, used)
            .into_iter()
            .flat_map(|g| g.nodes)
            .collect()
    }

    /// Whole tp-blocks superpod `super_pod_id` can still supply, summed over
    /// its groups.
    pub fn tp_block_num(&self, super_pod_id: i32, key: GroupKey, tp_block: usize, used: &BTreeSet<String>) -> usize {
        self.groups(super_pod_id, key, used)
            .iter()
            .map(|g| g.tp_block_num(tp_block))
            .sum()
    }

    /// Size of the largest free group anywhere in the cluster.
    pub fn largest_group(&self, key: GroupKey, used: &BTreeSet<String>) -> usize {
        self.super_pods
            .keys()
            .flat_map(|&id| self.groups(id, key, used))
            .map(|g| g.len())
            .max()
            .unwrap_or(0)
    }

    /// Build a fresh order table for the current free set.
    pub fn order_table(&self, key: GroupKey, tp_block: usize, used: &BTreeSet<String>) -> SuperPodOrderTable {
        SuperPodOrderTable::build(self, key, tp_block, used)
    }
}

// ── SuperPodOrderTable ────────────────────────────────────────────────────────

/// Superpods bucketed by remaining capacity.
///
/// `cells[row][col]` holds the ids (ascending) of superpods with `row` whole
/// tp-blocks and `col` leftover free nodes.  Superpods with no free nodes are
/// not listed.
#[derive(Debug, Clone, Default)]
pub struct SuperPodOrderTable {
    cells: Vec<Vec<Vec<i32>>>,
}

impl SuperPodOrderTable {
    pub fn build(topo: &Topology, key: GroupKey, tp_block: usize, used: &BTreeSet<String>) -> Self {
        let mut entries = Vec::new();
        for &id in topo.super_pods().keys() {
            let groups = topo.groups(id, key, used);
            let free: usize = groups.iter().map(NodeGroup::len).sum();
            if free == 0 {
                continue;
            }
            let row: usize = groups.iter().map(|g| g.tp_block_num(tp_block)).sum();
            let col = free - row * tp_block;
            entries.push((row, col, id));
        }

        let rows = entries.iter().map(|e| e.0 + 1).max().unwrap_or(0);
        let cols = entries.iter().map(|e| e.1 + 1).max().unwrap_or(0);
        let mut cells = vec![vec![Vec::new(); cols]; rows];
        for (row, col, id) in entries {
            cells[row][col].push(id);
        }

        Self { cells }
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn cell(&self, row: usize, col: usize) -> &[i32] {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Fewest whole tp-blocks first; within a row fewest leftover nodes first.
    pub fn fullest_first(&self) -> Vec<i32> {
        self.cells.iter().flatten().flatten().copied().collect()
    }

    /// Most whole tp-blocks first; within a row most leftover nodes first.
    /// Superpods sharing a cell keep ascending id order.
    pub fn emptiest_first(&self) -> Vec<i32> {
        self.cells
            .iter()
            .rev()
            .flat_map(|row| row.iter().rev())
            .flatten()
            .copied()
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// `count` nodes named `{prefix}{i}` in one superpod/rack.
    fn rack(prefix: &str, super_pod_id: i32, rack_id: i32, count: usize) -> Vec<NodeBaseInfo> {
        (0..count)
            .map(|i| NodeBaseInfo::new(format!("{prefix}{i:02}"), super_pod_id, rack_id))
            .collect()
    }

    #[test]
    fn build_groups_nodes_by_super_pod() {
        let mut nodes = rack("a", 0, 0, 3);
        nodes.extend(rack("b", 1, 0, 2));
        let topo = Topology::build(nodes);

        assert_eq!(topo.super_pods().len(), 2);
        assert_eq!(topo.super_pod(0).unwrap().len(), 3);
        assert_eq!(topo.node_count(), 5);
        assert!(topo
            .super_pod(1)
            .unwrap()
            .values()
            .all(|n| n.super_pod_id == 1));
    }

    #[test]
    fn groups_sorted_ascending_and_skip_used() {
        let mut nodes = rack("a", 0, 0, 4);
        nodes.extend(rack("b", 0, 1, 2));
        let topo = Topology::build(nodes);

        let groups = topo.groups(0, GroupKey::Rack, &BTreeSet::new());
        assert_eq!(groups.iter().map(|g| g.id).collect::<Vec<_>>(), vec![1, 0]);

        let used: BTreeSet<String> = ["a00", "a01", "a02"].iter().map(|s| s.to_string()).collect();
        let groups = topo.groups(0, GroupKey::Rack, &used);
        assert_eq!(groups.iter().map(|g| (g.id, g.len())).collect::<Vec<_>>(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn ub_mem_grouping_ignores_nodes_without_domain() {
        let mut nodes = rack("a", 0, 0, 2);
        nodes[0].ub_mem_id = Some(7);
        let topo = Topology::build(nodes);

        let groups = topo.groups(0, GroupKey::UbMem, &BTreeSet::new());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, 7);
        assert_eq!(groups[0].nodes[0].name, "a00");
    }

    #[test]
    fn tp_block_num_sums_whole_blocks_per_rack() {
        // racks of 3 and 5 with tp-block 2 → 1 + 2 whole blocks
        let mut nodes = rack("a", 0, 0, 3);
        nodes.extend(rack("b", 0, 1, 5));
        let topo = Topology::build(nodes);
        assert_eq!(topo.tp_block_num(0, GroupKey::Rack, 2, &BTreeSet::new()), 3);
    }

    #[test]
    fn order_table_orders_fullest_and_emptiest() {
        // sp0: 8 free, sp1: 2 free, sp2: 4 free, sp3: 3 free   (tp-block 2)
        let mut nodes = rack("a", 0, 0, 8);
        nodes.extend(rack("b", 1, 0, 2));
        nodes.extend(rack("c", 2, 0, 4));
        nodes.extend(rack("d", 3, 0, 3));
        let topo = Topology::build(nodes);

        let table = topo.order_table(GroupKey::Rack, 2, &BTreeSet::new());
        assert_eq!(table.rows(), 5);
        assert_eq!(table.cols(), 2);
        assert_eq!(table.cell(1, 1), &[3]);
        assert_eq!(table.fullest_first(), vec![1, 3, 2, 0]);
        assert_eq!(table.emptiest_first(), vec![0, 2, 3, 1]);
    }

    #[test]
    fn order_table_skips_exhausted_super_pods() {
        let topo = Topology::build(rack("a", 0, 0, 2));
        let used: BTreeSet<String> = ["a00", "a01"].iter().map(|s| s.to_string()).collect();
        let table = topo.order_table(GroupKey::Rack, 1, &used);
        assert!(table.fullest_first().is_empty());
        assert_eq!(table.rows(), 0);
    }
}

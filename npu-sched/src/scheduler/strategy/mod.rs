/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Placement strategies and their shared state.
//!
//! Every strategy implements [`PlacementStrategy::entry_select`], which returns
//! `Ok(false)` when the job is fully placed, `Ok(true)` when the next (wider)
//! strategy should be tried, and `Err` when escalating is pointless.
//!
//! ```text
//! Rack | UbMem  ──try next──►  SuperPod  ──try next──►  MultiSuperPod (+ soft fallback)
//! ```
//!
//! The mutable [`PlacementState`] is passed explicitly into each call.  A fresh
//! chain is built per scheduling call by [`strategy_chain`], so concurrent
//! jobs never share strategy instances.

mod multi_superpod;
mod rack;
mod superpod;

pub use multi_superpod::MultiSuperPodStrategy;
pub use rack::{RackStrategy, UbMemStrategy};
pub use superpod::SuperPodStrategy;

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use super::error::SchedulerError;
use crate::job::{JobParams, SelectedNodes, SuperNode};
use crate::topology::{GroupKey, NodeBaseInfo, NodeGroup, Topology};

// ── PlacementStrategy ─────────────────────────────────────────────────────────

/// One placement algorithm in the escalation chain.
pub trait PlacementStrategy {
    fn name(&self) -> &'static str;

    /// Try to place the remaining sp-blocks of `state`.
    ///
    /// Returns `Ok(true)` to ask for the next strategy.
    fn entry_select(&self, topo: &Topology, state: &mut PlacementState) -> Result<bool, SchedulerError>;
}

/// Build a fresh escalation chain for one job.
pub fn strategy_chain(params: &JobParams) -> Vec<Box<dyn PlacementStrategy>> {
    let first: Box<dyn PlacementStrategy> = if params.ub_mem_affinity {
        Box::new(UbMemStrategy)
    } else {
        Box::new(RackStrategy)
    };
    vec![first, Box::new(SuperPodStrategy), Box::new(MultiSuperPodStrategy)]
}

// ── PlacementState ────────────────────────────────────────────────────────────

/// Mutable accumulator shared by the strategies of one scheduling call.
#[derive(Debug, Clone)]
pub struct PlacementState {
    pub job: String,
    pub params: JobParams,
    /// Virtual superpod id → nodes placed under it.
    pub selected: SelectedNodes,
    /// Virtual ids that do not yet hold a full sp-block, in placement order.
    pub un_ready_ids: VecDeque<String>,
    /// sp-blocks still to place.  Decremented once per full sp-block.
    pub total_count: usize,
    /// Nodes consumed so far.
    pub used: BTreeSet<String>,
    /// Nodes the soft fallback could not supply.
    pub short_nodes: usize,
}

impl PlacementState {
    pub fn new(job: impl Into<String>, params: JobParams) -> Self {
        let count = params.sp_block_count();
        Self {
            job: job.into(),
            params,
            selected: SelectedNodes::new(),
            un_ready_ids: (0..count).map(|i| i.to_string()).collect(),
            total_count: count,
            used: BTreeSet::new(),
            short_nodes: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.total_count == 0
    }

    /// Record `node` under virtual id `vid`.
    fn push_node(&mut self, vid: &str, node: &NodeBaseInfo) {
        self.used.insert(node.name.clone());
        self.selected
            .entry(vid.to_string())
            .or_default()
            .push(node.to_super_node());
    }

    /// Close the head virtual id if it now holds a full sp-block.
    fn finish_head_if_full(&mut self) {
        let Some(vid) = self.un_ready_ids.front() else {
            return;
        };
        let placed = self.selected.get(vid).map_or(0, Vec::len);
        if placed == self.params.sp_block {
            debug!(job = %self.job, vid = %vid, "sp-block placed");
            self.un_ready_ids.pop_front();
            self.total_count = self.total_count.saturating_sub(1);
        }
    }

    /// Place one whole sp-block from `nodes` under the head virtual id.
    fn place_block(&mut self, nodes: &[NodeBaseInfo]) -> bool {
        let Some(vid) = self.un_ready_ids.front().cloned() else {
            return false;
        };
        if nodes.len() < self.params.sp_block {
            return false;
        }
        for node in &nodes[..self.params.sp_block] {
            self.push_node(&vid, node);
        }
        self.finish_head_if_full();
        true
    }
}

// ── doSelect ──────────────────────────────────────────────────────────────────

/// Assign one sp-block from superpod `super_pod_id` to the head virtual id,
/// made of whole tp-blocks each taken from a single group.
///
/// Groups are consumed in ascending free-size order and each group gives as
/// many tp-blocks as it can before the next group is touched.  Nothing is
/// changed when the superpod cannot supply a full sp-block.
pub fn do_select(topo: &Topology, super_pod_id: i32, key: GroupKey, state: &mut PlacementState) -> bool {
    let tp_block = state.params.tp_block;
    let needed = state.params.tp_blocks_per_sp_block();
    if tp_block == 0 || needed == 0 || state.un_ready_ids.is_empty() {
        return false;
    }

    let groups = topo.groups(super_pod_id, key, &state.used);
    let available: usize = groups.iter().map(|g| g.tp_block_num(tp_block)).sum();
    if available < needed {
        return false;
    }

    let mut picked: Vec<NodeBaseInfo> = Vec::with_capacity(state.params.sp_block);
    let mut remaining = needed;
    for group in &groups {
        if remaining == 0 {
            break;
        }
        let take = group.tp_block_num(tp_block).min(remaining);
        picked.extend(group.nodes.iter().take(take * tp_block).cloned());
        remaining -= take;
    }

    debug!(
        job = %state.job,
        super_pod = super_pod_id,
        nodes = picked.len(),
        "doSelect assigned sp-block"
    );
    state.place_block(&picked)
}

/// Pick the group best fitted to hold `need` nodes: an exact size match,
/// else the smallest group that is large enough.
pub(crate) fn best_fit_group<'g>(groups: &'g [NodeGroup], need: usize) -> Option<&'g NodeGroup> {
    groups
        .iter()
        .filter(|g| g.len() >= need)
        .min_by_key(|g| (g.len() - need, g.id))
}

/// Nodes of `vid` as placed, for callers that only need names.
pub fn node_names(nodes: &[SuperNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.name.as_str()).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn params(sp_block: usize, tp_block: usize, node_num: usize) -> JobParams {
        JobParams {
            sp_block,
            tp_block,
            node_num,
            soft_super_pod: false,
            ub_mem_affinity: false,
        }
    }

    /// `count` nodes named `{prefix}{i:02}` in superpod `sp`, rack `rack`.
    pub(crate) fn rack_nodes(prefix: &str, sp: i32, rack: i32, count: usize) -> Vec<NodeBaseInfo> {
        (0..count)
            .map(|i| NodeBaseInfo::new(format!("{prefix}{i:02}"), sp, rack))
            .collect()
    }

    #[test]
    fn new_state_creates_numbered_virtual_ids() {
        let s = PlacementState::new("j", params(4, 2, 12));
        assert_eq!(s.total_count, 3);
        assert_eq!(s.un_ready_ids, VecDeque::from(vec!["0".to_string(), "1".into(), "2".into()]));
    }

    #[test]
    fn do_select_takes_one_sp_block_from_single_rack() {
        let topo = Topology::build(rack_nodes("w", 0, 0, 12));
        let mut s = PlacementState::new("j", params(4, 4, 4));
        assert_eq!(s.total_count, 1);

        assert!(do_select(&topo, 0, GroupKey::Rack, &mut s));
        assert_eq!(s.selected.len(), 1);
        assert_eq!(s.selected["0"].len(), 4);
        assert_eq!(s.total_count, 0);
        assert!(s.un_ready_ids.is_empty());
        assert_eq!(s.used.len(), 4);
    }

    #[test]
    fn do_select_consumes_smallest_rack_first() {
        // rack 0 has 6 nodes, rack 1 has 2 nodes; sp-block 4 = 2 tp-blocks of 2
        let mut nodes = rack_nodes("a", 0, 0, 6);
        nodes.extend(rack_nodes("b", 0, 1, 2));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 2, 4));

        assert!(do_select(&topo, 0, GroupKey::Rack, &mut s));
        assert_eq!(node_names(&s.selected["0"]), vec!["b00", "b01", "a00", "a01"]);
    }

    #[test]
    fn do_select_refuses_when_tp_blocks_do_not_fit_racks() {
        // 3 + 3 free nodes, but tp-block 4 cannot straddle racks
        let mut nodes = rack_nodes("a", 0, 0, 3);
        nodes.extend(rack_nodes("b", 0, 1, 3));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 4, 4));

        assert!(!do_select(&topo, 0, GroupKey::Rack, &mut s));
        assert!(s.selected.is_empty());
        assert_eq!(s.total_count, 1);
    }

    #[test]
    fn best_fit_prefers_exact_then_smallest_excess() {
        let groups = vec![
            NodeGroup { id: 0, nodes: rack_nodes("a", 0, 0, 3) },
            NodeGroup { id: 1, nodes: rack_nodes("b", 0, 1, 6) },
            NodeGroup { id: 2, nodes: rack_nodes("c", 0, 2, 5) },
            NodeGroup { id: 3, nodes: rack_nodes("d", 0, 3, 4) },
        ];
        assert_eq!(best_fit_group(&groups, 4).map(|g| g.id), Some(3));
        assert_eq!(best_fit_group(&groups, 5).map(|g| g.id), Some(2));
        assert_eq!(best_fit_group(&groups, 7).map(|g| g.id), None);
    }

    #[test]
    fn chain_starts_with_ub_mem_when_requested() {
        let mut p = params(4, 2, 8);
        assert_eq!(strategy_chain(&p)[0].name(), "rack");
        p.ub_mem_affinity = true;
        let names: Vec<_> = strategy_chain(&p).iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["ubmem", "superpod", "multi-superpod"]);
    }
}

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Multi-superpod placement.
//!
//! Strict mode keeps every sp-block inside one superpod but lets the job
//! spread over as many superpods as needed.  When strict placement cannot
//! finish and the job allows soft superpod affinity, the remaining nodes are
//! taken greedily from the emptiest superpods with no block alignment at all.

use tracing::{debug, info, warn};

use super::superpod::{check_block_order, check_super_pod_is_satisfied};
use super::{do_select, PlacementState, PlacementStrategy};
use crate::scheduler::error::SchedulerError;
use crate::topology::{GroupKey, Topology};

#[derive(Debug, Default, Clone, Copy)]
pub struct MultiSuperPodStrategy;

impl PlacementStrategy for MultiSuperPodStrategy {
    fn name(&self) -> &'static str {
        "multi-superpod"
    }

    fn entry_select(&self, topo: &Topology, state: &mut PlacementState) -> Result<bool, SchedulerError> {
        if state.is_done() {
            return Ok(false);
        }
        check_block_order(state)?;

        let tp_block = state.params.tp_block;
        let required = state.params.tp_blocks_per_sp_block();
        let mut trial = state.clone();

        let table = topo.order_table(GroupKey::Rack, tp_block, &trial.used);
        for super_pod_id in table.fullest_first() {
            if trial.is_done() {
                break;
            }
            let have = topo.tp_block_num(super_pod_id, GroupKey::Rack, tp_block, &trial.used);
            if !check_super_pod_is_satisfied(have, required) {
                debug!(job = %trial.job, super_pod = super_pod_id, have, required, "superpod cannot hold one sp-block");
                continue;
            }
            while !trial.is_done() && do_select(topo, super_pod_id, GroupKey::Rack, &mut trial) {}
        }

        if trial.is_done() {
            info!(job = %trial.job, strategy = self.name(), "job placed");
            *state = trial;
            return Ok(false);
        }

        if state.params.soft_super_pod {
            info!(
                job = %trial.job,
                remaining = trial.total_count,
                "strict multi-superpod placement incomplete, using soft strategy"
            );
            *state = trial;
            select_from_super_pods_with_soft_strategy(topo, state);
            return Ok(false);
        }

        Ok(true)
    }
}

// ── Soft fallback ─────────────────────────────────────────────────────────────

/// Hands out virtual ids for the soft fallback: leftover unready ids from the
/// tail first, then fresh numeric ids after the largest one in use.
struct VPodIdRecorder {
    next_fresh: usize,
}

impl VPodIdRecorder {
    fn new(state: &PlacementState) -> Self {
        let max = state
            .selected
            .keys()
            .chain(state.un_ready_ids.iter())
            .filter_map(|id| id.parse::<usize>().ok())
            .max();
        Self {
            next_fresh: max.map_or(0, |m| m + 1),
        }
    }

    fn get_vpod_id(&mut self, state: &mut PlacementState) -> String {
        if let Some(id) = state.un_ready_ids.pop_back() {
            return id;
        }
        let id = self.next_fresh.to_string();
        self.next_fresh += 1;
        id
    }
}

/// Fill the remaining sp-blocks with whatever free nodes exist, emptiest
/// superpods first, in chunks of at most one sp-block per virtual id.
/// Records the shortfall in `state.short_nodes`.
pub(crate) fn select_from_super_pods_with_soft_strategy(topo: &Topology, state: &mut PlacementState) {
    let sp_block = state.params.sp_block.max(1);
    let mut needed = state.total_count * sp_block;
    let mut recorder = VPodIdRecorder::new(state);

    let table = topo.order_table(GroupKey::Rack, state.params.tp_block.max(1), &state.used);
    for super_pod_id in table.emptiest_first() {
        if needed == 0 {
            break;
        }
        let free = topo.free_nodes(super_pod_id, GroupKey::Rack, &state.used);
        for chunk in free.chunks(sp_block) {
            if needed == 0 {
                break;
            }
            let take = chunk.len().min(needed);
            let vid = recorder.get_vpod_id(state);
            for node in &chunk[..take] {
                state.push_node(&vid, node);
            }
            if take == sp_block {
                state.total_count = state.total_count.saturating_sub(1);
            }
            debug!(job = %state.job, vid = %vid, super_pod = super_pod_id, nodes = take, "soft placement");
            needed -= take;
        }
    }

    state.short_nodes = needed;
    if needed > 0 {
        warn!(job = %state.job, short = needed, "soft placement could not supply every node");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::strategy::tests::{params, rack_nodes};

    #[test]
    fn spreads_sp_blocks_over_super_pods() {
        let mut nodes = rack_nodes("a", 0, 0, 4);
        nodes.extend(rack_nodes("b", 1, 0, 4));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 2, 8));

        assert!(!MultiSuperPodStrategy.entry_select(&topo, &mut s).unwrap());
        assert_eq!(s.total_count, 0);
        assert_ne!(s.selected["0"][0].super_pod_id, s.selected["1"][0].super_pod_id);
        assert_eq!(s.short_nodes, 0);
    }

    #[test]
    fn strict_failure_without_soft_escalates() {
        // two superpods of 3 nodes; sp-block 4 fits in neither
        let mut nodes = rack_nodes("a", 0, 0, 3);
        nodes.extend(rack_nodes("b", 1, 0, 3));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 1, 4));

        assert!(MultiSuperPodStrategy.entry_select(&topo, &mut s).unwrap());
        assert!(s.selected.is_empty());
    }

    #[test]
    fn soft_fallback_takes_unaligned_nodes() {
        let mut nodes = rack_nodes("a", 0, 0, 3);
        nodes.extend(rack_nodes("b", 1, 0, 3));
        let topo = Topology::build(nodes);
        let mut p = params(4, 1, 4);
        p.soft_super_pod = true;
        let mut s = PlacementState::new("j", p);

        assert!(!MultiSuperPodStrategy.entry_select(&topo, &mut s).unwrap());
        let placed: usize = s.selected.values().map(Vec::len).sum();
        assert_eq!(placed, 4);
        assert_eq!(s.short_nodes, 0);
        // first chunk reuses the pending id "0", the second one is fresh
        assert_eq!(s.selected["0"].len(), 3);
        assert_eq!(s.selected["1"].len(), 1);
        // no chunk was a full sp-block
        assert_eq!(s.total_count, 1);
    }

    #[test]
    fn soft_fallback_reports_shortfall() {
        let topo = Topology::build(rack_nodes("a", 0, 0, 2));
        let mut p = params(4, 2, 4);
        p.soft_super_pod = true;
        let mut s = PlacementState::new("j", p);

        assert!(!MultiSuperPodStrategy.entry_select(&topo, &mut s).unwrap());
        assert_eq!(s.short_nodes, 2);
    }

    #[test]
    fn soft_fallback_keeps_strict_blocks_and_reuses_tail_ids() {
        // sp0 holds one full sp-block, sp1 only 2 nodes; 2 sp-blocks of 4
        let mut nodes = rack_nodes("a", 0, 0, 4);
        nodes.extend(rack_nodes("b", 1, 0, 2));
        nodes.extend(rack_nodes("c", 2, 0, 2));
        let topo = Topology::build(nodes);
        let mut p = params(4, 2, 8);
        p.soft_super_pod = true;
        let mut s = PlacementState::new("j", p);

        assert!(!MultiSuperPodStrategy.entry_select(&topo, &mut s).unwrap());
        assert!(s.selected["0"].iter().all(|n| n.super_pod_id == 0));
        assert_eq!(s.selected["1"].len(), 2);
        assert_eq!(s.selected["2"].len(), 2);
        assert_eq!(s.short_nodes, 0);
    }
}

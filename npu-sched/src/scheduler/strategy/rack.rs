/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Rack-level (and UB-memory-domain-level) placement.
//!
//! Each sp-block is placed inside a single group, and the whole job inside a
//! single superpod.  Superpods are visited fullest-first; inside one superpod
//! the best-fit group is chosen for every sp-block.

use tracing::{debug, info};

use super::{best_fit_group, PlacementState, PlacementStrategy};
use crate::scheduler::error::SchedulerError;
use crate::topology::{GroupKey, Topology};

/// One sp-block per rack.
#[derive(Debug, Default, Clone, Copy)]
pub struct RackStrategy;

/// One sp-block per UB-memory domain.
#[derive(Debug, Default, Clone, Copy)]
pub struct UbMemStrategy;

impl PlacementStrategy for RackStrategy {
    fn name(&self) -> &'static str {
        "rack"
    }

    fn entry_select(&self, topo: &Topology, state: &mut PlacementState) -> Result<bool, SchedulerError> {
        select_by_group(self.name(), GroupKey::Rack, topo, state)
    }
}

impl PlacementStrategy for UbMemStrategy {
    fn name(&self) -> &'static str {
        "ubmem"
    }

    fn entry_select(&self, topo: &Topology, state: &mut PlacementState) -> Result<bool, SchedulerError> {
        select_by_group(self.name(), GroupKey::UbMem, topo, state)
    }
}

fn select_by_group(
    name: &'static str,
    key: GroupKey,
    topo: &Topology,
    state: &mut PlacementState,
) -> Result<bool, SchedulerError> {
    if state.is_done() {
        return Ok(false);
    }

    let sp_block = state.params.sp_block;
    let tp_block = state.params.tp_block;
    let largest = topo.largest_group(key, &state.used);

    // A job that is a single tp-block can never be split, so a wider scope
    // would not help.
    if state.params.node_num == tp_block && largest < tp_block {
        return Err(SchedulerError::NoRackForTpBlock {
            job: state.job.clone(),
            tp_block,
            largest,
        });
    }

    if largest < sp_block {
        debug!(
            job = %state.job,
            strategy = name,
            largest,
            sp_block,
            "no group can hold a whole sp-block"
        );
        return Ok(true);
    }

    let table = topo.order_table(key, tp_block, &state.used);
    for super_pod_id in table.fullest_first() {
        let mut trial = state.clone();
        while !trial.is_done() {
            let groups = topo.groups(super_pod_id, key, &trial.used);
            let Some(group) = best_fit_group(&groups, sp_block) else {
                break;
            };
            debug!(
                job = %trial.job,
                super_pod = super_pod_id,
                group = group.id,
                free = group.len(),
                "best-fit group"
            );
            trial.place_block(&group.nodes);
        }

        if trial.is_done() {
            info!(job = %trial.job, strategy = name, super_pod = super_pod_id, "job placed");
            *state = trial;
            return Ok(false);
        }
    }

    Ok(true)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::strategy::node_names;
    use crate::scheduler::strategy::tests::{params, rack_nodes};

    #[test]
    fn picks_exact_fit_rack() {
        // racks of 6, 4, 5 nodes; sp-block 4 → rack 1 (exact)
        let mut nodes = rack_nodes("a", 0, 0, 6);
        nodes.extend(rack_nodes("b", 0, 1, 4));
        nodes.extend(rack_nodes("c", 0, 2, 5));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 2, 4));

        assert!(!RackStrategy.entry_select(&topo, &mut s).unwrap());
        assert_eq!(node_names(&s.selected["0"]), vec!["b00", "b01", "b02", "b03"]);
    }

    #[test]
    fn picks_smallest_larger_rack_without_exact_fit() {
        let mut nodes = rack_nodes("a", 0, 0, 8);
        nodes.extend(rack_nodes("c", 0, 2, 5));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 2, 4));

        assert!(!RackStrategy.entry_select(&topo, &mut s).unwrap());
        assert!(s.selected["0"].iter().all(|n| n.rack_id == 2));
    }

    #[test]
    fn places_several_blocks_in_one_super_pod() {
        let mut nodes = rack_nodes("a", 0, 0, 4);
        nodes.extend(rack_nodes("b", 0, 1, 4));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 4, 8));

        assert!(!RackStrategy.entry_select(&topo, &mut s).unwrap());
        assert_eq!(s.total_count, 0);
        assert_ne!(s.selected["0"][0].rack_id, s.selected["1"][0].rack_id);
    }

    #[test]
    fn escalates_when_sp_block_exceeds_every_rack() {
        let topo = Topology::build(rack_nodes("a", 0, 0, 4));
        let mut s = PlacementState::new("j", params(8, 4, 8));

        assert!(RackStrategy.entry_select(&topo, &mut s).unwrap());
        assert!(s.selected.is_empty());
    }

    #[test]
    fn single_tp_block_job_without_room_is_terminal() {
        let mut nodes = rack_nodes("a", 0, 0, 2);
        nodes.extend(rack_nodes("b", 0, 1, 2));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 4, 4));

        let err = RackStrategy.entry_select(&topo, &mut s).unwrap_err();
        assert!(matches!(err, SchedulerError::NoRackForTpBlock { largest: 2, .. }));
    }

    #[test]
    fn whole_job_must_fit_one_super_pod() {
        // two superpods with one 4-node rack each; two sp-blocks of 4
        let mut nodes = rack_nodes("a", 0, 0, 4);
        nodes.extend(rack_nodes("b", 1, 0, 4));
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 2, 8));

        assert!(RackStrategy.entry_select(&topo, &mut s).unwrap());
        assert!(s.selected.is_empty(), "abandoned attempt must not leak");
    }

    #[test]
    fn ub_mem_groups_by_domain() {
        let mut nodes = rack_nodes("a", 0, 0, 2);
        nodes.extend(rack_nodes("b", 0, 1, 2));
        for n in &mut nodes {
            n.ub_mem_id = Some(9);
        }
        let topo = Topology::build(nodes);
        let mut s = PlacementState::new("j", params(4, 2, 4));

        // racks are 2 + 2 but the UB-memory domain holds all 4
        assert!(RackStrategy.entry_select(&topo, &mut s).unwrap());
        let mut s = PlacementState::new("j", params(4, 2, 4));
        assert!(!UbMemStrategy.entry_select(&topo, &mut s).unwrap());
        assert_eq!(s.selected["0"].len(), 4);
    }
}

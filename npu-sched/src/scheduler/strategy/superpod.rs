/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Single-superpod placement: sp-blocks may span racks, tp-blocks may not,
//! and the whole job stays inside one superpod.

use tracing::{debug, info};

use super::{do_select, PlacementState, PlacementStrategy};
use crate::scheduler::error::SchedulerError;
use crate::topology::{GroupKey, Topology};

#[derive(Debug, Default, Clone, Copy)]
pub struct SuperPodStrategy;

/// `true` when a superpod offering `tp_block_num` whole tp-blocks can cover
/// `required` of them.
pub(crate) fn check_super_pod_is_satisfied(tp_block_num: usize, required: usize) -> bool {
    tp_block_num >= required
}

/// Superpod-level strategies need tp-blocks that fit inside sp-blocks.
pub(crate) fn check_block_order(state: &PlacementState) -> Result<(), SchedulerError> {
    if state.params.tp_block > state.params.sp_block {
        return Err(SchedulerError::TpBlockExceedsSpBlock {
            job: state.job.clone(),
            tp_block: state.params.tp_block,
            sp_block: state.params.sp_block,
        });
    }
    Ok(())
}

impl PlacementStrategy for SuperPodStrategy {
    fn name(&self) -> &'static str {
        "superpod"
    }

    fn entry_select(&self, topo: &Topology, state: &mut PlacementState) -> Result<bool, SchedulerError> {
        if state.is_done() {
            return Ok(false);
        }
        check_block_order(state)?;

        let tp_block = state.params.tp_block;
        let required = state.total_count * state.params.sp_block / tp_block;
        let table = topo.order_table(GroupKey::Rack, tp_block, &state.used);

        for super_pod_id in table.fullest_first() {
            let have = topo.tp_block_num(super_pod_id, GroupKey::Rack, tp_block, &state.used);
            if !check_super_pod_is_satisfied(have, required) {
                debug!(job = %state.job, super_pod = super_pod_id, have, required, "superpod too small");
                continue;
            }

            let mut trial = state.clone();
            while !trial.is_done() && do_select(topo, super_pod_id, GroupKey::Rack, &mut trial) {}

            if trial.is_done() {
                info!(job = %trial.job, strategy = self.name(), super_pod = super_pod_id, "job placed");
                *state = trial;
                return Ok(false);
            }
        }

        Ok(true)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

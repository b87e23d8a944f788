/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Superpod-aware placement for multi-node NPU training jobs.
//!
//! [`SuperPodScheduler`] turns a [`JobInfo`] into a [`SelectedNodes`] map:
//! one list of nodes per virtual superpod, each list being a whole number of
//! sp-blocks made of whole tp-blocks.
//!
//! ```text
//! JobInfo ──► JobValidator ──► JobParams
//!                                  │
//! cluster snapshot ──► Topology ───┤
//!                                  ▼
//!             Rack|UbMem ──► SuperPod ──► MultiSuperPod (+ soft)
//!                                  │
//!                                  ▼
//!                            ScheduleOutcome
//! ```
//!
//! # Design decisions
//!
//! | Topic | Choice |
//! |---|---|
//! | State | Stateless `schedule()`: topology, strategies and placement state are local to the call |
//! | Strategy objects | Fresh chain per call from [`strategy_chain`], nothing shared across jobs |
//! | Abandoned attempts | Each strategy works on a clone of the state and commits only on success |
//! | Map iteration order | `BTreeMap` everywhere, so identical input gives identical output |
//! | Error returns | `Result<_, SchedulerError>` with typed variants |
//!
//! # Example
//! ```rust,ignore
//! let scheduler = SuperPodScheduler::new(Arc::new(cluster));
//! let outcome = scheduler.schedule(&job)?;
//! for (vid, nodes) in &outcome.selected { /* bind pods */ }
//! ```

pub mod error;
pub mod reschedule;
pub mod strategy;
pub mod validate;

pub use error::{SchedulerError, ValidateResult};
pub use reschedule::{FaultJob, FaultNode, NodePool, RescheduleOutcome, Rescheduler};

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ClusterConfigManager;
use crate::job::{JobInfo, JobParams, SelectedNodes};
use crate::topology::{NodeBaseInfo, Topology};

use strategy::{strategy_chain, PlacementState};
use validate::JobValidator;

// ── ScheduleOutcome ───────────────────────────────────────────────────────────

/// Placement of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub job: String,
    /// Name of the strategy that finished the placement.
    pub strategy: &'static str,
    pub selected: SelectedNodes,
    /// Nodes the soft fallback could not supply; 0 for strict placement.
    pub short_nodes: usize,
}

impl ScheduleOutcome {
    pub fn node_count(&self) -> usize {
        self.selected.values().map(Vec::len).sum()
    }
}

// ── SuperPodScheduler ─────────────────────────────────────────────────────────

/// Places jobs on the nodes of a cluster snapshot.
///
/// Holds only a shared reference to the snapshot, so one instance can serve
/// concurrent scheduling calls.
pub struct SuperPodScheduler {
    cluster: Arc<ClusterConfigManager>,
}

impl SuperPodScheduler {
    pub fn new(cluster: Arc<ClusterConfigManager>) -> Self {
        Self { cluster }
    }

    // ── Public entry points ───────────────────────────────────────────────────

    /// Validate `job` and place it on the free, fully usable nodes of the
    /// snapshot.
    ///
    /// # Errors
    /// * [`SchedulerError::ConfigNotLoaded`] without a snapshot.
    /// * [`SchedulerError::Validation`] when the block parameters are wrong.
    /// * A terminal strategy error, or [`SchedulerError::NoFeasiblePlacement`]
    ///   when every strategy asked to escalate.
    pub fn schedule(&self, job: &JobInfo) -> Result<ScheduleOutcome, SchedulerError> {
        if !self.cluster.is_loaded() {
            return Err(SchedulerError::ConfigNotLoaded);
        }
        let params = self.validate(job)?;
        let nodes = self.schedulable_nodes(&BTreeSet::new());
        self.place(&job.name, params, Topology::build(nodes))
    }

    /// Repair the placement of a partially faulted job.
    ///
    /// Healthy virtual superpods are kept; faulted ones are patched from the
    /// free pool.  When patching is impossible the whole job is placed again
    /// over the free nodes plus its own healthy members.
    pub fn reschedule(&self, job: &JobInfo, fault_job: &mut FaultJob) -> Result<RescheduleOutcome, SchedulerError> {
        if !self.cluster.is_loaded() {
            return Err(SchedulerError::ConfigNotLoaded);
        }
        let params = self.validate(job)?;
        let cfg = self.cluster.scheduler_config();

        let members = fault_job.member_names();
        let candidates: Vec<NodeBaseInfo> = self
            .schedulable_nodes(&members)
            .into_iter()
            .filter(|n| fault_job.is_usable(&n.name))
            .collect();

        let mut pool: NodePool = candidates
            .iter()
            .map(|n| (n.name.clone(), n.clone()))
            .collect();
        let mut trial = fault_job.clone();
        match Rescheduler::new(params, cfg.first_reschedule_stage, &mut pool).reschedule(&mut trial) {
            Ok(outcome) => {
                *fault_job = trial;
                Ok(outcome)
            }
            Err(SchedulerError::BackToVspSchedule { .. }) => {
                warn!(job = %job.name, "in-place repair impossible, running full placement");
                let placed = self.place(&job.name, params, Topology::build(candidates))?;
                Ok(Self::adopt_full_placement(fault_job, placed))
            }
            Err(e) => Err(e),
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn validate(&self, job: &JobInfo) -> Result<JobParams, SchedulerError> {
        JobValidator::new(job, self.cluster.scheduler_config())
            .validate()
            .map_err(|result| SchedulerError::Validation {
                job: job.name.clone(),
                result,
            })
    }

    /// Nodes a full-node task may land on: free (or in `owned`) and with a
    /// complete set of usable NPUs.
    fn schedulable_nodes(&self, owned: &BTreeSet<String>) -> Vec<NodeBaseInfo> {
        let max_npu = self.cluster.scheduler_config().max_node_npu_num;
        self.cluster
            .get_all_nodes()
            .values()
            .filter(|n| !n.allocated || owned.contains(&n.name))
            .filter(|n| {
                let ok = n.has_full_npus(max_npu);
                if !ok {
                    debug!(node = %n.name, usable = ?n.usable_npu_num(), "node skipped: missing NPUs");
                }
                ok
            })
            .map(|n| n.base_info())
            .collect()
    }

    /// Run the escalation chain over `topo`.
    fn place(&self, job: &str, params: JobParams, topo: Topology) -> Result<ScheduleOutcome, SchedulerError> {
        info!(
            job,
            sp_block = params.sp_block,
            tp_block = params.tp_block,
            node_num = params.node_num,
            free_nodes = topo.node_count(),
            "=== SuperPodScheduler::schedule() ==="
        );

        let state = PlacementState::new(job, params);
        for strategy in strategy_chain(&params) {
            let mut trial = state.clone();
            debug!(job, strategy = strategy.name(), remaining = trial.total_count, "trying strategy");
            let try_next = strategy.entry_select(&topo, &mut trial)?;
            if try_next {
                debug!(job, strategy = strategy.name(), "strategy asked to escalate");
                continue;
            }

            let outcome = ScheduleOutcome {
                job: job.to_string(),
                strategy: strategy.name(),
                selected: trial.selected,
                short_nodes: trial.short_nodes,
            };
            info!(
                job,
                strategy = outcome.strategy,
                vpods = outcome.selected.len(),
                nodes = outcome.node_count(),
                short = outcome.short_nodes,
                "=== Scheduling complete ==="
            );
            return Ok(outcome);
        }

        Err(SchedulerError::NoFeasiblePlacement {
            job: job.to_string(),
            remaining: state.total_count,
        })
    }

    fn adopt_full_placement(fault_job: &mut FaultJob, placed: ScheduleOutcome) -> RescheduleOutcome {
        let old = fault_job.member_names();
        let new: BTreeSet<String> = placed.selected.values().flatten().map(|n| n.name.clone()).collect();

        let new_nodes: BTreeSet<String> = new.difference(&old).cloned().collect();
        let freed_nodes: BTreeSet<String> = old
            .difference(&new)
            .filter(|n| fault_job.is_usable(n))
            .cloned()
            .collect();

        fault_job.rescheduled_nodes.extend(new_nodes.iter().cloned());
        fault_job.super_pods = placed.selected.clone();
        RescheduleOutcome {
            selected: placed.selected,
            new_nodes,
            freed_nodes,
            full_reschedule: true,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

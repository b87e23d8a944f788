/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-place repair of a partially faulted placement.
//!
//! ```text
//! for each virtual superpod:
//!   all members healthy ──► keep as is
//!   otherwise ──► same-rack replacement (if the recovery stage allows it)
//!             └─► whole tp-block moved to another rack of the same superpod
//!             └─► BackToVspSchedule (caller re-runs full placement)
//! finally every virtual superpod must hold at least one sp-block
//! ```
//!
//! The engine works on a pool of free nodes supplied by the caller and never
//! touches the topology snapshot; nodes taken from the pool are recorded in
//! [`FaultJob::rescheduled_nodes`] so later rounds know which members are
//! replacements.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use super::error::SchedulerError;
use crate::job::{JobParams, SelectedNodes, SuperNode};
use crate::topology::NodeBaseInfo;

/// Free nodes available for repair, keyed by node name.
pub type NodePool = BTreeMap<String, NodeBaseInfo>;

// ── Fault bookkeeping ─────────────────────────────────────────────────────────

/// Health of one node that belongs to a faulted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultNode {
    pub name: String,
    pub is_healthy: bool,
    /// `false` when the node no longer satisfies the job's rack affinity.
    pub rack_affinity_ok: bool,
}

impl FaultNode {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_healthy: true,
            rack_affinity_ok: true,
        }
    }

    pub fn faulted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_healthy: false,
            rack_affinity_ok: true,
        }
    }

    pub fn usable(&self) -> bool {
        self.is_healthy && self.rack_affinity_ok
    }
}

/// Rescheduling history of one job.
#[derive(Debug, Clone, Default)]
pub struct FaultJob {
    pub job_uid: String,
    /// Current assignment: virtual superpod id → members.
    pub super_pods: SelectedNodes,
    /// Health per member node.  Members without an entry count as healthy.
    pub fault_nodes: BTreeMap<String, FaultNode>,
    /// Recovery sessions still pending for this job.
    pub pending_session_num: u32,
    /// The job allows recovering single processes in place.
    pub process_recover_enable: bool,
    /// Nodes brought in by earlier repairs.
    pub rescheduled_nodes: BTreeSet<String>,
}

impl FaultJob {
    pub fn new(job_uid: impl Into<String>, super_pods: SelectedNodes) -> Self {
        Self {
            job_uid: job_uid.into(),
            super_pods,
            ..Default::default()
        }
    }

    pub fn mark(&mut self, node: FaultNode) {
        self.fault_nodes.insert(node.name.clone(), node);
    }

    /// `true` when `name` is healthy and keeps its rack affinity.
    pub fn is_usable(&self, name: &str) -> bool {
        self.fault_nodes.get(name).map_or(true, FaultNode::usable)
    }

    /// Every node currently assigned to the job.
    pub fn member_names(&self) -> BTreeSet<String> {
        self.super_pods
            .values()
            .flatten()
            .map(|n| n.name.clone())
            .collect()
    }
}

/// Result of one repair round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescheduleOutcome {
    pub selected: SelectedNodes,
    /// Nodes that joined the job in this round.
    pub new_nodes: BTreeSet<String>,
    /// Healthy nodes the job released in this round.
    pub freed_nodes: BTreeSet<String>,
    /// `true` when the repair gave up and a full placement was run instead.
    pub full_reschedule: bool,
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Repairs one [`FaultJob`] against a pool of free nodes.
pub struct Rescheduler<'a> {
    params: JobParams,
    first_reschedule_stage: u32,
    pool: &'a mut NodePool,
}

impl<'a> Rescheduler<'a> {
    pub fn new(params: JobParams, first_reschedule_stage: u32, pool: &'a mut NodePool) -> Self {
        Self {
            params,
            first_reschedule_stage,
            pool,
        }
    }

    /// Repair `fault_job` in place.
    ///
    /// On success `fault_job.super_pods` holds the repaired assignment.  On
    /// any error `fault_job` is untouched, but nodes may already have been
    /// taken out of the pool, so the caller must discard the pool.
    pub fn reschedule(&mut self, fault_job: &mut FaultJob) -> Result<RescheduleOutcome, SchedulerError> {
        info!(
            job = %fault_job.job_uid,
            vpods = fault_job.super_pods.len(),
            pending = fault_job.pending_session_num,
            "rescheduling faulted job"
        );

        let mut outcome = RescheduleOutcome::default();
        let mut repaired = SelectedNodes::new();
        let mut broken: Vec<String> = Vec::new();

        // healthy members stay with the job in every path
        for (vid, nodes) in &fault_job.super_pods {
            for node in nodes {
                if fault_job.is_usable(&node.name) {
                    self.pool.remove(&node.name);
                }
            }
            if nodes.iter().all(|n| fault_job.is_usable(&n.name)) {
                debug!(job = %fault_job.job_uid, vid = %vid, "virtual superpod healthy");
                repaired.insert(vid.clone(), nodes.clone());
            } else {
                broken.push(vid.clone());
            }
        }

        for vid in broken {
            let mut nodes = fault_job.super_pods.get(&vid).cloned().unwrap_or_default();
            self.select_nodes_by_rack(fault_job, &vid, &mut nodes, &mut outcome)?;
            repaired.insert(vid, nodes);
        }

        self.check_result(&fault_job.job_uid, &repaired)?;

        fault_job.rescheduled_nodes.extend(outcome.new_nodes.iter().cloned());
        fault_job.super_pods = repaired.clone();
        outcome.selected = repaired;
        info!(
            job = %fault_job.job_uid,
            new = outcome.new_nodes.len(),
            freed = outcome.freed_nodes.len(),
            "job repaired in place"
        );
        Ok(outcome)
    }

    /// Repair one virtual superpod, preferring same-rack replacements.
    fn select_nodes_by_rack(
        &mut self,
        fault_job: &FaultJob,
        vid: &str,
        nodes: &mut Vec<SuperNode>,
        outcome: &mut RescheduleOutcome,
    ) -> Result<(), SchedulerError> {
        let faulted: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !fault_job.is_usable(&n.name))
            .map(|(i, _)| i)
            .collect();

        let same_rack_allowed =
            fault_job.process_recover_enable || fault_job.pending_session_num <= self.first_reschedule_stage;
        if same_rack_allowed && self.get_same_rack_nodes(nodes, &faulted, &mut outcome.new_nodes) {
            debug!(job = %fault_job.job_uid, vid, replaced = faulted.len(), "same-rack replacement");
            return Ok(());
        }

        self.select_alternate_racks(fault_job, vid, nodes, outcome)
    }

    /// Replace every faulted member with a free node from its own rack.
    ///
    /// All or nothing: when any faulted member has no same-rack spare, nothing
    /// is changed and `false` is returned.
    pub fn get_same_rack_nodes(
        &mut self,
        nodes: &mut [SuperNode],
        faulted: &[usize],
        new_nodes: &mut BTreeSet<String>,
    ) -> bool {
        let mut chosen: Vec<(usize, NodeBaseInfo)> = Vec::with_capacity(faulted.len());
        let mut taken: BTreeSet<&str> = BTreeSet::new();

        for &idx in faulted {
            let Some(old) = nodes.get(idx) else {
                return false;
            };
            let spare = self.pool.values().find(|n| {
                n.super_pod_id == old.super_pod_id && n.rack_id == old.rack_id && !taken.contains(n.name.as_str())
            });
            match spare {
                Some(spare) => {
                    taken.insert(spare.name.as_str());
                    chosen.push((idx, spare.clone()));
                }
                None => return false,
            }
        }

        for (idx, spare) in chosen {
            self.pool.remove(&spare.name);
            new_nodes.insert(spare.name.clone());
            nodes[idx] = spare.to_super_node();
        }
        true
    }

    /// Move every tp-block that contains a faulted member to another rack of
    /// the same superpod.
    fn select_alternate_racks(
        &mut self,
        fault_job: &FaultJob,
        vid: &str,
        nodes: &mut [SuperNode],
        outcome: &mut RescheduleOutcome,
    ) -> Result<(), SchedulerError> {
        let tp_block = self.params.tp_block.max(1);

        for chunk in nodes.chunks_mut(tp_block) {
            if chunk.iter().all(|n| fault_job.is_usable(&n.name)) {
                continue;
            }
            let super_pod_id = chunk[0].super_pod_id;
            let Some(rack_id) = self.best_alternate_rack(super_pod_id, chunk.len()) else {
                warn!(
                    job = %fault_job.job_uid,
                    vid,
                    super_pod = super_pod_id,
                    tp_block,
                    "no rack has room for a tp-block"
                );
                return Err(SchedulerError::BackToVspSchedule {
                    job: fault_job.job_uid.clone(),
                });
            };

            let replacements: Vec<NodeBaseInfo> = self
                .pool
                .values()
                .filter(|n| n.super_pod_id == super_pod_id && n.rack_id == rack_id)
                .take(chunk.len())
                .cloned()
                .collect();

            for (slot, spare) in chunk.iter_mut().zip(replacements) {
                if fault_job.is_usable(&slot.name) {
                    outcome.freed_nodes.insert(slot.name.clone());
                    self.pool.insert(slot.name.clone(), NodeBaseInfo::from(&*slot));
                }
                self.pool.remove(&spare.name);
                outcome.new_nodes.insert(spare.name.clone());
                *slot = spare.to_super_node();
            }
            debug!(job = %fault_job.job_uid, vid, rack = rack_id, "tp-block moved to another rack");
        }
        Ok(())
    }

    /// Rack of `super_pod_id` with at least `need` free nodes, fewest free
    /// nodes first, ties by rack id.
    fn best_alternate_rack(&self, super_pod_id: i32, need: usize) -> Option<i32> {
        let mut free: BTreeMap<i32, usize> = BTreeMap::new();
        for node in self.pool.values().filter(|n| n.super_pod_id == super_pod_id) {
            *free.entry(node.rack_id).or_default() += 1;
        }
        free.into_iter()
            .filter(|&(_, count)| count >= need)
            .min_by_key(|&(rack, count)| (count, rack))
            .map(|(rack, _)| rack)
    }

    fn check_result(&self, job: &str, selected: &SelectedNodes) -> Result<(), SchedulerError> {
        for (vid, nodes) in selected {
            if nodes.len() < self.params.sp_block {
                return Err(SchedulerError::RescheduleFailed {
                    job: job.to_string(),
                    vid: vid.clone(),
                    have: nodes.len(),
                    need: self.params.sp_block,
                });
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::strategy::node_names;

    fn params(sp_block: usize, tp_block: usize, node_num: usize) -> JobParams {
        JobParams {
            sp_block,
            tp_block,
            node_num,
            soft_super_pod: false,
            ub_mem_affinity: false,
        }
    }

    fn sn(name: &str, sp: i32, rack: i32) -> SuperNode {
        SuperNode {
            name: name.to_string(),
            super_pod_id: sp,
            rack_id: rack,
        }
    }

    fn pool(nodes: &[(&str, i32, i32)]) -> NodePool {
        nodes
            .iter()
            .map(|&(name, sp, rack)| (name.to_string(), NodeBaseInfo::new(name, sp, rack)))
            .collect()
    }

    fn four_node_job() -> FaultJob {
        let mut selected = SelectedNodes::new();
        selected.insert(
            "0".into(),
            vec![sn("work0", 0, 0), sn("work1", 0, 0), sn("work2", 0, 0), sn("work3", 0, 0)],
        );
        FaultJob::new("job-a", selected)
    }

    #[test]
    fn same_rack_spare_replaces_faulted_member() {
        let mut job = four_node_job();
        job.mark(FaultNode::faulted("work1"));
        let mut free = pool(&[("work8", 0, 0), ("work6", 0, 1)]);

        let mut engine = Rescheduler::new(params(4, 2, 4), 1, &mut free);
        let out = engine.reschedule(&mut job).unwrap();

        assert_eq!(node_names(&out.selected["0"]), vec!["work0", "work8", "work2", "work3"]);
        assert!(free.contains_key("work6"));
        assert!(!free.contains_key("work8"));
        assert!(job.rescheduled_nodes.contains("work8"));
        assert!(out.freed_nodes.is_empty());
        assert!(!out.full_reschedule);
    }

    #[test]
    fn same_rack_replacement_is_all_or_nothing() {
        let mut nodes = vec![sn("work0", 0, 0), sn("work1", 0, 0), sn("work2", 0, 0)];
        let mut free = pool(&[("work8", 0, 0)]);
        let mut new_nodes = BTreeSet::new();

        let mut engine = Rescheduler::new(params(3, 1, 3), 1, &mut free);
        assert!(!engine.get_same_rack_nodes(&mut nodes, &[0, 1], &mut new_nodes));
        assert!(new_nodes.is_empty());
        assert_eq!(nodes[0].name, "work0");
        assert!(free.contains_key("work8"));
    }

    #[test]
    fn healthy_virtual_superpods_are_kept() {
        let mut job = four_node_job();
        let mut free = pool(&[("work0", 0, 0), ("work9", 0, 0)]);

        let mut engine = Rescheduler::new(params(4, 2, 4), 1, &mut free);
        let out = engine.reschedule(&mut job).unwrap();

        assert_eq!(out.selected, job.super_pods);
        assert!(out.new_nodes.is_empty());
        assert!(!free.contains_key("work0"), "kept members leave the pool");
        assert!(free.contains_key("work9"));
    }

    #[test]
    fn late_stage_moves_tp_block_to_alternate_rack() {
        let mut job = four_node_job();
        job.mark(FaultNode::faulted("work1"));
        job.pending_session_num = 3;
        // same-rack spare exists but the stage forbids it; rack 2 is the
        // tightest rack with room for a tp-block of 2
        let mut free = pool(&[
            ("work8", 0, 0),
            ("r1-a", 0, 1),
            ("r1-b", 0, 1),
            ("r1-c", 0, 1),
            ("r2-a", 0, 2),
            ("r2-b", 0, 2),
        ]);

        let mut engine = Rescheduler::new(params(4, 2, 4), 1, &mut free);
        let out = engine.reschedule(&mut job).unwrap();

        assert_eq!(node_names(&out.selected["0"]), vec!["r2-a", "r2-b", "work2", "work3"]);
        assert_eq!(out.freed_nodes, BTreeSet::from(["work0".to_string()]));
        assert!(free.contains_key("work0"), "released member returns to the pool");
        assert!(job.rescheduled_nodes.contains("r2-a"));
    }

    #[test]
    fn process_recover_enable_allows_same_rack_at_late_stage() {
        let mut job = four_node_job();
        job.mark(FaultNode::faulted("work1"));
        job.pending_session_num = 3;
        job.process_recover_enable = true;
        let mut free = pool(&[("work8", 0, 0)]);

        let mut engine = Rescheduler::new(params(4, 2, 4), 1, &mut free);
        let out = engine.reschedule(&mut job).unwrap();
        assert!(out.new_nodes.contains("work8"));
    }

    #[test]
    fn no_rack_with_room_falls_back_to_full_schedule() {
        let mut job = four_node_job();
        job.mark(FaultNode::faulted("work1"));
        let mut free = pool(&[("work6", 0, 1)]);

        let mut engine = Rescheduler::new(params(4, 2, 4), 1, &mut free);
        let before = job.super_pods.clone();
        let err = engine.reschedule(&mut job).unwrap_err();
        assert!(matches!(err, SchedulerError::BackToVspSchedule { .. }));
        assert_eq!(job.super_pods, before);
        assert!(job.rescheduled_nodes.is_empty());
    }

    #[test]
    fn short_virtual_superpod_fails_validation() {
        let mut selected = SelectedNodes::new();
        selected.insert("0".into(), vec![sn("work0", 0, 0), sn("work1", 0, 0)]);
        let mut job = FaultJob::new("job-b", selected);
        let mut free = NodePool::new();

        let mut engine = Rescheduler::new(params(4, 2, 4), 1, &mut free);
        let err = engine.reschedule(&mut job).unwrap_err();
        assert!(matches!(err, SchedulerError::RescheduleFailed { have: 2, need: 4, .. }));
    }

    #[test]
    fn rack_affinity_loss_counts_as_fault() {
        let mut job = four_node_job();
        job.mark(FaultNode {
            name: "work3".into(),
            is_healthy: true,
            rack_affinity_ok: false,
        });
        assert!(!job.is_usable("work3"));
        assert!(job.is_usable("work0"));
    }
}

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Job-side data structures for superpod placement.
//!
//! Two distinct types model the two sides of the placement pipeline:
//!
//! ```text
//! scheduler framework ──►  JobInfo  ──(validate)──►  JobParams  ──(strategies)──►  SelectedNodes
//!                           ↑ raw NPU counts           ↑ node-unit blocks            ↑ per virtual superpod
//! ```
//!
//! # Ownership model
//! `JobInfo` is borrowed for one scheduling call.  `JobParams` is derived from
//! it by the validator and copied into every strategy attempt; the strategies
//! fill a `SelectedNodes` map in place which is handed back to the caller as
//! the job's placement.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── JobInfo (input) ───────────────────────────────────────────────────────────

/// One task (pod) of a training job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: String,
    /// NPUs requested by this task.
    pub req_npu_num: u32,
}

/// The parts of a training job the placement algorithm reads.
///
/// Block sizes are in NPUs, exactly as the user wrote them; they are turned
/// into node units by [`JobValidator`](crate::scheduler::validate::JobValidator).
#[derive(Debug, Clone, Default)]
pub struct JobInfo {
    pub name: String,

    /// NPUs per super-pod block (`sp-block` label).  May be zero or negative
    /// when misconfigured; validation rejects those values.
    pub sp_block_npu_num: i32,

    /// NPUs per tensor-parallel block (`tp-block` label).
    pub tp_block_npu_num: i32,

    /// Number of tasks that request NPUs.
    pub npu_task_num: u32,

    /// Total NPUs requested by the job.
    pub req_npu_num: u32,

    pub tasks: Vec<TaskInfo>,

    /// Allow spreading across superpods when block-aligned placement fails.
    pub soft_super_pod: bool,

    /// Group by UB-memory domain instead of rack.
    pub ub_mem_affinity: bool,
}

impl JobInfo {
    /// A job of `task_num` full-node tasks.
    pub fn full_node(
        name: impl Into<String>,
        sp_block_npu_num: i32,
        tp_block_npu_num: i32,
        task_num: u32,
        node_npu_num: u32,
    ) -> Self {
        let name = name.into();
        let tasks = (0..task_num)
            .map(|i| TaskInfo {
                name: format!("{name}-task-{i}"),
                req_npu_num: node_npu_num,
            })
            .collect();
        Self {
            name,
            sp_block_npu_num,
            tp_block_npu_num,
            npu_task_num: task_num,
            req_npu_num: task_num * node_npu_num,
            tasks,
            ..Default::default()
        }
    }
}

// ── JobParams (validated, node units) ─────────────────────────────────────────

/// Validated placement parameters in node units.
///
/// Invariants (guaranteed by the validator): `tp_block <= sp_block`,
/// `sp_block % tp_block == 0`, `node_num % sp_block == 0`, all positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobParams {
    /// Nodes per super-pod block.
    pub sp_block: usize,
    /// Nodes per tensor-parallel block.
    pub tp_block: usize,
    /// Total nodes the job needs (one task per node).
    pub node_num: usize,
    pub soft_super_pod: bool,
    pub ub_mem_affinity: bool,
}

impl JobParams {
    /// Number of sp-blocks the job is made of.
    pub fn sp_block_count(&self) -> usize {
        if self.sp_block == 0 {
            0
        } else {
            self.node_num / self.sp_block
        }
    }

    /// Number of tp-blocks in one sp-block.
    pub fn tp_blocks_per_sp_block(&self) -> usize {
        if self.tp_block == 0 {
            0
        } else {
            self.sp_block / self.tp_block
        }
    }
}

// ── SelectedNodes (output) ────────────────────────────────────────────────────

/// A node as recorded in a placement: identity plus its physical location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperNode {
    pub name: String,
    pub super_pod_id: i32,
    pub rack_id: i32,
}

/// Virtual superpod id → nodes assigned under it, in assignment order.
///
/// `BTreeMap` so output order is stable across runs.
pub type SelectedNodes = BTreeMap<String, Vec<SuperNode>>;

// ── Tests ─────────────────────────────────────────────────────────────────────

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Job block-parameter validation.
//!
//! Four checks run in order; the first failure short-circuits and is handed
//! to the scheduling framework verbatim:
//!
//! 1. [`JobValidator::check_sp_block`]: derives `sp_block` (nodes).
//! 2. [`JobValidator::check_tp_block_num`]: range and power-of-two.
//! 3. [`JobValidator::calculate_tp_block_and_check`]: derives `tp_block`
//!    (nodes) and checks divisibility against `sp_block` and the task count.
//! 4. [`JobValidator::check_job_req_npu_num`]: requested NPUs line up with the
//!    blocks and every task takes a whole node.

use tracing::{debug, warn};

use super::error::ValidateResult;
use crate::config::SchedulerConfig;
use crate::job::{JobInfo, JobParams};

// ── Reason codes ──────────────────────────────────────────────────────────────

pub const SP_BLOCK_INVALID_REASON: &str = "sp-block is invalid";
pub const TP_BLOCK_INVALID_REASON: &str = "tp-block is invalid";
pub const TASK_NUM_INVALID_REASON: &str = "task number is invalid";
pub const NPU_NUM_INVALID_REASON: &str = "npu number is invalid";

// ── JobValidator ──────────────────────────────────────────────────────────────

/// Validates one job against the node/rack shape of the cluster.
pub struct JobValidator<'a> {
    job: &'a JobInfo,
    max_node_npu_num: u32,
    rack_npu_num: u32,
}

impl<'a> JobValidator<'a> {
    pub fn new(job: &'a JobInfo, cfg: &SchedulerConfig) -> Self {
        Self {
            job,
            max_node_npu_num: cfg.max_node_npu_num,
            rack_npu_num: cfg.rack_npu_num(),
        }
    }

    /// Run every check and return the node-unit parameters on success.
    pub fn validate(&self) -> Result<JobParams, ValidateResult> {
        let mut params = JobParams {
            sp_block: 0,
            tp_block: 0,
            node_num: self.job.npu_task_num as usize,
            soft_super_pod: self.job.soft_super_pod,
            ub_mem_affinity: self.job.ub_mem_affinity,
        };

        let failure = self
            .check_node_npu_num()
            .or_else(|| self.check_sp_block(&mut params))
            .or_else(|| self.check_tp_block_num())
            .or_else(|| self.calculate_tp_block_and_check(&mut params))
            .or_else(|| self.check_job_req_npu_num());

        match failure {
            Some(result) => {
                warn!(
                    job = %self.job.name,
                    reason = %result.reason,
                    message = %result.message,
                    "job rejected by validation"
                );
                Err(result)
            }
            None => {
                debug!(
                    job = %self.job.name,
                    sp_block = params.sp_block,
                    tp_block = params.tp_block,
                    node_num = params.node_num,
                    "job parameters valid"
                );
                Ok(params)
            }
        }
    }

    /// The node shape must allow dividing an sp-block into nodes.
    pub fn check_node_npu_num(&self) -> Option<ValidateResult> {
        if self.max_node_npu_num == 0 {
            return Some(ValidateResult::fail(
                NPU_NUM_INVALID_REASON,
                "Node npu number(0) is invalid.",
            ));
        }
        None
    }

    /// sp-block NPUs must be positive; below one node it collapses to a
    /// single node, otherwise it must be a whole number of nodes.  The task
    /// count must be a multiple of the resulting node count.
    pub fn check_sp_block(&self, params: &mut JobParams) -> Option<ValidateResult> {
        let sp = self.job.sp_block_npu_num;
        if sp <= 0 {
            return Some(ValidateResult::fail(
                SP_BLOCK_INVALID_REASON,
                format!("Parameter sp-block({sp}) is invalid."),
            ));
        }

        let sp = sp as u32;
        params.sp_block = if sp < self.max_node_npu_num {
            1
        } else {
            if sp % self.max_node_npu_num != 0 {
                return Some(ValidateResult::fail(
                    SP_BLOCK_INVALID_REASON,
                    format!(
                        "Parameter sp-block({sp}) should be a multiple of node npu number({}).",
                        self.max_node_npu_num
                    ),
                ));
            }
            (sp / self.max_node_npu_num) as usize
        };

        let task_num = self.job.npu_task_num as usize;
        if task_num % params.sp_block != 0 {
            return Some(ValidateResult::fail(
                TASK_NUM_INVALID_REASON,
                format!(
                    "Job task number({task_num}) should be a multiple of sp-block node number({}).",
                    params.sp_block
                ),
            ));
        }
        None
    }

    /// tp-block NPUs must be a power of two within one rack.
    pub fn check_tp_block_num(&self) -> Option<ValidateResult> {
        let tp = self.job.tp_block_npu_num;
        if tp < 1 || tp as u32 > self.rack_npu_num {
            return Some(ValidateResult::fail(
                TP_BLOCK_INVALID_REASON,
                format!(
                    "Parameter tp-block({tp}) should be in range [1, {}].",
                    self.rack_npu_num
                ),
            ));
        }
        if !(tp as u32).is_power_of_two() {
            return Some(ValidateResult::fail(
                TP_BLOCK_INVALID_REASON,
                format!("Parameter tp-block({tp}) should be a power of 2."),
            ));
        }
        None
    }

    /// `tp_block = ceil(tp / node_npu)`; it must fit inside and divide
    /// `sp_block`, and divide the task count.
    pub fn calculate_tp_block_and_check(&self, params: &mut JobParams) -> Option<ValidateResult> {
        let tp = self.job.tp_block_npu_num as u32;
        params.tp_block = tp.div_ceil(self.max_node_npu_num) as usize;

        if params.tp_block > params.sp_block {
            return Some(ValidateResult::fail(
                TP_BLOCK_INVALID_REASON,
                format!(
                    "Parameter tp-block({tp}) should not be larger than sp-block({}).",
                    self.job.sp_block_npu_num
                ),
            ));
        }

        let task_num = self.job.npu_task_num as usize;
        if task_num % params.tp_block != 0 {
            return Some(ValidateResult::fail(
                TASK_NUM_INVALID_REASON,
                format!(
                    "Job task number({task_num}) should be a multiple of tp-block node number({}).",
                    params.tp_block
                ),
            ));
        }

        if params.sp_block % params.tp_block != 0 {
            return Some(ValidateResult::fail(
                SP_BLOCK_INVALID_REASON,
                format!(
                    "Parameter sp-block({}) should be a multiple of tp-block({tp}).",
                    self.job.sp_block_npu_num
                ),
            ));
        }
        None
    }

    /// Single-task jobs request exactly one sp-block inside one node;
    /// multi-task jobs request whole blocks made of full nodes.
    pub fn check_job_req_npu_num(&self) -> Option<ValidateResult> {
        let req = self.job.req_npu_num;
        let sp = self.job.sp_block_npu_num as u32;
        let tp = self.job.tp_block_npu_num as u32;
        let max = self.max_node_npu_num;

        if self.job.npu_task_num == 1 {
            if req < 1 || req > max {
                return Some(ValidateResult::fail(
                    NPU_NUM_INVALID_REASON,
                    format!("Job require npu number({req}) should be in range [1, {max}]."),
                ));
            }
            if req != sp {
                return Some(ValidateResult::fail(
                    NPU_NUM_INVALID_REASON,
                    format!("Job require npu number({req}) should be equal to sp-block({sp})."),
                ));
            }
            return None;
        }

        if req % sp != 0 || req % tp != 0 {
            return Some(ValidateResult::fail(
                NPU_NUM_INVALID_REASON,
                format!(
                    "Job require npu number({req}) should be a multiple of sp-block({sp}) and tp-block({tp})."
                ),
            ));
        }

        if let Some(task) = self.job.tasks.iter().find(|t| t.req_npu_num != max) {
            return Some(ValidateResult::fail(
                NPU_NUM_INVALID_REASON,
                format!(
                    "Task {} require npu number({}) should be {max}.",
                    task.name, task.req_npu_num
                ),
            ));
        }
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

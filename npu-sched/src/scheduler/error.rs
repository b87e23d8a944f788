/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for superpod placement.
//!
//! Two layers, mirroring how the scheduling framework consumes them:
//!
//! * [`ValidateResult`]: a job's block parameters are misconfigured.  Carries
//!   a short reason code and a human message that are surfaced verbatim; these
//!   are never retried.
//! * [`SchedulerError`]: top-level failure returned from
//!   [`SuperPodScheduler::schedule()`](super::SuperPodScheduler::schedule) and
//!   the rescheduling engine.
//!
//! Callers match on the variants: [`SchedulerError::BackToVspSchedule`] is a
//! control signal, not a failure to report.

use thiserror::Error;

// ── Validation ────────────────────────────────────────────────────────────────

/// Outcome of one job-parameter check.
///
/// Only failing results are ever materialised (`pass == false`); a passing
/// check returns `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateResult {
    pub pass: bool,
    pub reason: String,
    pub message: String,
}

impl ValidateResult {
    pub fn fail(reason: &str, message: impl Into<String>) -> Self {
        Self {
            pass: false,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidateResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

// ── Top-level scheduler errors ────────────────────────────────────────────────

/// Every failure the placement pipeline can report.
///
/// | Variant | Escalates to next strategy? |
/// |---|---|
/// | `Validation` | no, job is misconfigured |
/// | `ConfigNotLoaded` | no |
/// | `TpBlockExceedsSpBlock` | no |
/// | `NoRackForTpBlock` | no, a single tp-block cannot be split |
/// | `NoFeasiblePlacement` | chain exhausted |
/// | `BackToVspSchedule` | caller re-runs full placement |
/// | `RescheduleFailed` | no |
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job block parameters failed validation.
    #[error("job '{job}' failed validation: {result}")]
    Validation { job: String, result: ValidateResult },

    /// No cluster snapshot has been loaded.
    #[error("cluster snapshot is not loaded")]
    ConfigNotLoaded,

    /// Superpod-level strategies require `tp_block <= sp_block`.
    #[error("tp-block({tp_block}) is larger than sp-block({sp_block}) for job '{job}'")]
    TpBlockExceedsSpBlock {
        job: String,
        tp_block: usize,
        sp_block: usize,
    },

    /// The whole job is one tp-block and no rack can hold it.
    #[error("no rack can hold a tp-block of {tp_block} node(s) for job '{job}' (largest free rack has {largest})")]
    NoRackForTpBlock {
        job: String,
        tp_block: usize,
        largest: usize,
    },

    /// Every strategy in the chain asked to escalate.
    #[error("no feasible placement for job '{job}': {remaining} sp-block(s) could not be placed")]
    NoFeasiblePlacement { job: String, remaining: usize },

    /// In-place repair is impossible; the caller must run full placement.
    #[error("job '{job}' needs a full virtual-superpod reschedule")]
    BackToVspSchedule { job: String },

    /// Repair finished but a virtual superpod is still short of nodes.
    #[error("rescheduling job '{job}' failed: virtual superpod '{vid}' has {have} of {need} node(s)")]
    RescheduleFailed {
        job: String,
        vid: String,
        have: usize,
        need: usize,
    },
}

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-job fault caches.
//!
//! Faults are split into *retry* faults (UCE memory errors and HCCL timeouts,
//! which a lightweight step retry may fix) and *normal* faults (anything
//! needing a heavier recovery).  Retry faults are reclassified as normal as
//! soon as retrying stops being an option.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::proto::FaultRankInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultType {
    Normal,
    /// Uncorrectable memory error, retryable.
    Uce,
    /// Collective-communication timeout, retryable.
    Hccl,
}

impl FaultType {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultType::Normal => "normal",
            FaultType::Uce => "uce",
            FaultType::Hccl => "hccl",
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, FaultType::Normal)
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(FaultType::Normal),
            "uce" => Ok(FaultType::Uce),
            "hccl" => Ok(FaultType::Hccl),
            other => Err(format!("unknown fault type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FaultRank {
    pub rank_id: String,
    pub fault_type: FaultType,
}

impl FaultRank {
    pub fn new(rank_id: impl Into<String>, fault_type: FaultType) -> Self {
        Self {
            rank_id: rank_id.into(),
            fault_type,
        }
    }

    pub fn to_info(&self) -> FaultRankInfo {
        FaultRankInfo {
            rank_id: self.rank_id.clone(),
            fault_type: self.fault_type.as_str().to_string(),
        }
    }
}

/// Inputs to [`FaultCache::take_retry_fault_to_normal_fault`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryContext {
    /// The previous strategy of this episode was a retry and it failed.
    pub retry_failed: bool,
    /// The job supports step retry at all.
    pub support_retry: bool,
}

/// Both fault caches of one job.
#[derive(Debug, Clone, Default)]
pub struct FaultCache {
    retry: Vec<FaultRank>,
    normal: Vec<FaultRank>,
}

impl FaultCache {
    /// Record a fault.  Returns `false` for duplicates.
    ///
    /// A rank is cached at most once: a second retryable report for a rank
    /// already in the retry cache is dropped whatever its kind, and a rank
    /// already known as normal-faulted is not added to the retry cache again.
    pub fn add(&mut self, fault: FaultRank) -> bool {
        if self.normal.iter().any(|f| f.rank_id == fault.rank_id) {
            return false;
        }
        if fault.fault_type.is_retryable() {
            if self.retry.iter().any(|f| f.rank_id == fault.rank_id) {
                return false;
            }
            debug!(rank = %fault.rank_id, kind = %fault.fault_type, "retry fault cached");
            self.retry.push(fault);
        } else {
            self.retry.retain(|f| f.rank_id != fault.rank_id);
            debug!(rank = %fault.rank_id, "normal fault cached");
            self.normal.push(fault);
        }
        true
    }

    /// Move every retry fault into the normal cache when any of these hold:
    /// the last retry failed, normal faults are already present, the job
    /// cannot retry, or the retry faults are of more than one kind.
    ///
    /// Returns `true` when faults were moved.  Callers hold the controller's
    /// write lock across the whole call.
    pub fn take_retry_fault_to_normal_fault(&mut self, ctx: RetryContext) -> bool {
        if self.retry.is_empty() {
            return false;
        }
        let kinds: BTreeSet<FaultType> = self.retry.iter().map(|f| f.fault_type).collect();
        let reclassify = ctx.retry_failed || !self.normal.is_empty() || !ctx.support_retry || kinds.len() > 1;
        if !reclassify {
            return false;
        }

        info!(
            moved = self.retry.len(),
            retry_failed = ctx.retry_failed,
            has_normal = !self.normal.is_empty(),
            support_retry = ctx.support_retry,
            kinds = kinds.len(),
            "retry faults reclassified as normal"
        );
        for fault in std::mem::take(&mut self.retry) {
            if !self.normal.iter().any(|f| f.rank_id == fault.rank_id) {
                self.normal.push(FaultRank::new(fault.rank_id, FaultType::Normal));
            }
        }
        true
    }

    pub fn retry_faults(&self) -> &[FaultRank] {
        &self.retry
    }

    pub fn normal_faults(&self) -> &[FaultRank] {
        &self.normal
    }

    pub fn has_normal_fault(&self) -> bool {
        !self.normal.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.retry.is_empty() && self.normal.is_empty()
    }

    /// Every cached fault, normal ones first.
    pub fn all(&self) -> Vec<FaultRank> {
        self.normal.iter().chain(self.retry.iter()).cloned().collect()
    }

    pub fn rank_faulted(&self, rank_id: &str) -> bool {
        self.normal.iter().chain(self.retry.iter()).any(|f| f.rank_id == rank_id)
    }

    pub fn clear(&mut self) {
        self.retry.clear();
        self.normal.clear();
    }
}

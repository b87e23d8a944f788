/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Recovery strategy selection.
//!
//! ```text
//! first decision:   Retry → RecoverInPlace → Recover → ScaleIn → Dump → Exit
//! after Retry fail:         RecoverInPlace → Recover → ScaleIn → Dump → Exit
//! after Recover / ScaleIn / ScaleOut fail:                        Dump → Exit
//! after anything else fails:                                             Exit
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecoverStrategy {
    /// Re-run the failed training step on the same processes.
    Retry,
    /// Restart only the faulted processes, without rescheduling pods.
    RecoverInPlace,
    /// Reschedule the faulted pods and resume from the last checkpoint.
    Recover,
    /// Continue training without the faulted ranks.
    ScaleIn,
    /// Grow back to full size after a scale-in.
    ScaleOut,
    /// Save a checkpoint and exit.
    Dump,
    Exit,
}

impl RecoverStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoverStrategy::Retry => "retry",
            RecoverStrategy::RecoverInPlace => "recover-in-place",
            RecoverStrategy::Recover => "recover",
            RecoverStrategy::ScaleIn => "elastic-training",
            RecoverStrategy::ScaleOut => "scale-out",
            RecoverStrategy::Dump => "dump",
            RecoverStrategy::Exit => "exit",
        }
    }

    /// Strategies the agent carries out by restarting processes in place.
    pub fn is_process_level(self) -> bool {
        matches!(
            self,
            RecoverStrategy::RecoverInPlace | RecoverStrategy::ScaleIn | RecoverStrategy::ScaleOut
        )
    }
}

impl fmt::Display for RecoverStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoverStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(RecoverStrategy::Retry),
            "recover-in-place" => Ok(RecoverStrategy::RecoverInPlace),
            "recover" => Ok(RecoverStrategy::Recover),
            "elastic-training" | "scale-in" => Ok(RecoverStrategy::ScaleIn),
            "scale-out" => Ok(RecoverStrategy::ScaleOut),
            "dump" => Ok(RecoverStrategy::Dump),
            "exit" => Ok(RecoverStrategy::Exit),
            other => Err(format!("unknown recover strategy '{other}'")),
        }
    }
}

/// Everything [`choose_strategy`] looks at.
#[derive(Debug, Clone, Default)]
pub struct DecisionInput {
    /// Strategies the agent reported it can run.
    pub supported: BTreeSet<RecoverStrategy>,
    pub has_normal_fault: bool,
    /// The job asked for faulted processes to be restarted in place.
    pub restart_fault_process: bool,
    /// Elastic training is configured for the job.
    pub elastic: bool,
    pub rank0_faulted: bool,
    /// Enough free resources exist to reschedule faulted pods.
    pub resources_available: bool,
    /// The strategy that was tried last in this episode and failed.
    pub failed: Option<RecoverStrategy>,
}

impl DecisionInput {
    fn supports(&self, s: RecoverStrategy) -> bool {
        self.supported.contains(&s)
    }

    fn pick_from(&self, chain: &[RecoverStrategy]) -> RecoverStrategy {
        chain
            .iter()
            .copied()
            .find(|&s| self.allows(s))
            .unwrap_or(RecoverStrategy::Exit)
    }

    fn allows(&self, s: RecoverStrategy) -> bool {
        match s {
            RecoverStrategy::Retry => self.supports(s) && !self.has_normal_fault,
            RecoverStrategy::RecoverInPlace => self.restart_fault_process && self.supports(s),
            RecoverStrategy::Recover => self.supports(s) && (!self.elastic || self.resources_available),
            RecoverStrategy::ScaleIn => self.elastic && !self.rank0_faulted && self.supports(s),
            RecoverStrategy::ScaleOut => false,
            RecoverStrategy::Dump => self.supports(s),
            RecoverStrategy::Exit => true,
        }
    }
}

const FIRST_CHAIN: [RecoverStrategy; 6] = [
    RecoverStrategy::Retry,
    RecoverStrategy::RecoverInPlace,
    RecoverStrategy::Recover,
    RecoverStrategy::ScaleIn,
    RecoverStrategy::Dump,
    RecoverStrategy::Exit,
];

/// Pick the next strategy for a fault episode.
pub fn choose_strategy(input: &DecisionInput) -> RecoverStrategy {
    match input.failed {
        None => input.pick_from(&FIRST_CHAIN),
        Some(RecoverStrategy::Retry) => input.pick_from(&FIRST_CHAIN[1..]),
        Some(RecoverStrategy::Recover | RecoverStrategy::ScaleIn | RecoverStrategy::ScaleOut) => {
            input.pick_from(&[RecoverStrategy::Dump, RecoverStrategy::Exit])
        }
        Some(_) => RecoverStrategy::Exit,
    }
}

/// Parse agent-reported strategy names, skipping unknown ones.
pub fn parse_supported<'a>(names: impl IntoIterator<Item = &'a String>) -> BTreeSet<RecoverStrategy> {
    names.into_iter().filter_map(|n| n.parse().ok()).collect()
}

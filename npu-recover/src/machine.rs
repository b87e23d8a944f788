/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Table-driven recovery state machine.
//!
//! The machine itself is synchronous and side-effect free: [`StateMachine::trigger`]
//! looks up the `(state, event)` rule, moves to its destination and tells the
//! caller which [`Handler`] to run.  The controller runs the handler and feeds
//! the event it produces (if any) straight back into `trigger`.
//!
//! Main path of one fault episode:
//!
//! ```text
//! Init ─FaultOccur─► NotifyWaitFaultFlushing ─► NotifyStopTrain ─► WaitReportStopComplete
//!   ─► WaitFaultFlushFinished ─► NotifyGlobalFault ─► WaitReportRecoverStrategy
//!   ─► NotifyDecidedStrategy ─┬─ Retry ──────────► WaitReportStepRetryStatus ──────┐
//!                             ├─ process level ──► WaitReportProcessRecoverStatus ─┤
//!                             ├─ Recover ──► (KillPodForUnrecoverableRetry) ─►     │
//!                             │              ListenScheduleResult ─────────────────┤
//!                             ├─ Dump ─► NotifyDump ─► WaitReportDumpStatus ───────┤
//!                             └─ Exit ─► NotifyKillJob ─Finish─► Init              │
//!                                                                                  ▼
//!   CheckRecoverResult ─┬─ RecoverSuccess ─► FaultClear ─Finish─► Init
//!                       ├─ RecoverFail ────► NotifyDecidedStrategy
//!                       ├─ RetryAgain ─────► FaultRetry ─Restart─► NotifyWaitFaultFlushing
//!                       └─ RestartAll ─────► NotifyRestartAllProcess ─► WaitRestartAllProcess
//! ```

use std::fmt;

use tracing::{debug, warn};

use crate::error::{RecoverCode, TransitionError};

// ── States and events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    NotifyWaitFaultFlushing,
    NotifyStopTrain,
    NotifyDump,
    WaitReportStopComplete,
    WaitFaultFlushFinished,
    NotifyGlobalFault,
    WaitReportRecoverStrategy,
    NotifyDecidedStrategy,
    WaitReportStepRetryStatus,
    WaitReportProcessRecoverStatus,
    WaitReportDumpStatus,
    CheckRecoverResult,
    KillPodForUnrecoverableRetry,
    ListenScheduleResult,
    NotifyRestartAllProcess,
    WaitRestartAllProcess,
    FaultClear,
    FaultRetry,
    NotifyKillJob,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    FaultOccur,
    NotifySuccess,
    NotifyFail,
    ReceiveReport,
    ReportFail,
    ReportTimeout,
    RetryStrategy,
    ProcessRecoverStrategy,
    WaitSchedule,
    KillPod,
    DumpStrategy,
    ExitStrategy,
    ScheduleSuccess,
    ScheduleTimeout,
    RecoverSuccess,
    RecoverFail,
    RetryAgain,
    RestartAll,
    OperateConfigMapError,
    OperatePodGroupError,
    Restart,
    Finish,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// Action run by the controller on entering a rule's destination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    NotifyFaultFlushing,
    NotifyStopTrain,
    WaitStopComplete,
    WaitFaultFlush,
    NotifyGlobalFault,
    WaitRecoverStrategy,
    DecideStrategy,
    WaitRecoverStatus,
    KillPodForRetry,
    ListenSchedule,
    NotifyDump,
    CheckRecoverResult,
    NotifyRestartAll,
    FaultRetry,
    FaultClear,
    KillJob,
    Reset,
}

/// What the machine should do after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Wait for an external event.
    Stay,
    /// Feed this event back into the machine immediately.
    Transition(Event),
    /// The episode is over; the controller resets.
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerResult {
    pub next: Next,
    pub code: RecoverCode,
}

impl HandlerResult {
    pub fn next(event: Event) -> Self {
        Self {
            next: Next::Transition(event),
            code: RecoverCode::Ok,
        }
    }

    pub fn fail(event: Event, code: RecoverCode) -> Self {
        Self {
            next: Next::Transition(event),
            code,
        }
    }

    pub fn terminal() -> Self {
        Self {
            next: Next::Terminal,
            code: RecoverCode::Ok,
        }
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub src: State,
    pub event: Event,
    pub dst: State,
    pub handler: Option<Handler>,
}

const fn rule(src: State, event: Event, dst: State, handler: Handler) -> Rule {
    Rule {
        src,
        event,
        dst,
        handler: Some(handler),
    }
}

/// The full transition table.
pub fn recover_rules() -> Vec<Rule> {
    use Event as E;
    use Handler as H;
    use State as S;

    let mut rules = vec![
        rule(S::Init, E::FaultOccur, S::NotifyWaitFaultFlushing, H::NotifyFaultFlushing),
        rule(S::NotifyWaitFaultFlushing, E::NotifySuccess, S::NotifyStopTrain, H::NotifyStopTrain),
        rule(S::NotifyStopTrain, E::NotifySuccess, S::WaitReportStopComplete, H::WaitStopComplete),
        rule(S::NotifyStopTrain, E::NotifyFail, S::NotifyKillJob, H::KillJob),
        rule(S::WaitReportStopComplete, E::ReceiveReport, S::WaitFaultFlushFinished, H::WaitFaultFlush),
        rule(S::WaitFaultFlushFinished, E::ReceiveReport, S::NotifyGlobalFault, H::NotifyGlobalFault),
        rule(S::NotifyGlobalFault, E::NotifySuccess, S::WaitReportRecoverStrategy, H::WaitRecoverStrategy),
        rule(S::NotifyGlobalFault, E::NotifyFail, S::NotifyKillJob, H::KillJob),
        rule(S::WaitReportRecoverStrategy, E::ReceiveReport, S::NotifyDecidedStrategy, H::DecideStrategy),
        // decided strategy
        rule(S::NotifyDecidedStrategy, E::RetryStrategy, S::WaitReportStepRetryStatus, H::WaitRecoverStatus),
        rule(
            S::NotifyDecidedStrategy,
            E::ProcessRecoverStrategy,
            S::WaitReportProcessRecoverStatus,
            H::WaitRecoverStatus,
        ),
        rule(S::NotifyDecidedStrategy, E::WaitSchedule, S::ListenScheduleResult, H::ListenSchedule),
        rule(S::NotifyDecidedStrategy, E::KillPod, S::KillPodForUnrecoverableRetry, H::KillPodForRetry),
        rule(S::NotifyDecidedStrategy, E::DumpStrategy, S::NotifyDump, H::NotifyDump),
        rule(S::NotifyDecidedStrategy, E::ExitStrategy, S::NotifyKillJob, H::KillJob),
        rule(S::NotifyDecidedStrategy, E::NotifyFail, S::NotifyKillJob, H::KillJob),
        rule(S::KillPodForUnrecoverableRetry, E::NotifySuccess, S::ListenScheduleResult, H::ListenSchedule),
        rule(S::KillPodForUnrecoverableRetry, E::NotifyFail, S::NotifyKillJob, H::KillJob),
        rule(S::ListenScheduleResult, E::ScheduleSuccess, S::WaitReportProcessRecoverStatus, H::WaitRecoverStatus),
        rule(S::ListenScheduleResult, E::ScheduleTimeout, S::NotifyKillJob, H::KillJob),
        rule(S::ListenScheduleResult, E::NotifyFail, S::NotifyKillJob, H::KillJob),
        rule(S::NotifyDump, E::NotifySuccess, S::WaitReportDumpStatus, H::WaitRecoverStatus),
        rule(S::NotifyDump, E::NotifyFail, S::NotifyKillJob, H::KillJob),
        // results
        rule(S::CheckRecoverResult, E::RecoverSuccess, S::FaultClear, H::FaultClear),
        rule(S::CheckRecoverResult, E::RecoverFail, S::NotifyDecidedStrategy, H::DecideStrategy),
        rule(S::CheckRecoverResult, E::RetryAgain, S::FaultRetry, H::FaultRetry),
        rule(S::CheckRecoverResult, E::RestartAll, S::NotifyRestartAllProcess, H::NotifyRestartAll),
        rule(S::FaultRetry, E::Restart, S::NotifyWaitFaultFlushing, H::NotifyFaultFlushing),
        rule(S::NotifyRestartAllProcess, E::NotifySuccess, S::WaitRestartAllProcess, H::WaitRecoverStatus),
        // episode end
        rule(S::FaultClear, E::Finish, S::Init, H::Reset),
        rule(S::NotifyKillJob, E::Finish, S::Init, H::Reset),
    ];

    // every report wait has the same three exits
    let report_waits = [
        (S::WaitReportStopComplete, None),
        (S::WaitReportRecoverStrategy, None),
        (S::WaitReportStepRetryStatus, Some(S::CheckRecoverResult)),
        (S::WaitReportProcessRecoverStatus, Some(S::CheckRecoverResult)),
        (S::WaitReportDumpStatus, Some(S::CheckRecoverResult)),
        (S::WaitRestartAllProcess, Some(S::CheckRecoverResult)),
    ];
    for (wait, on_report) in report_waits {
        if let Some(dst) = on_report {
            rules.push(rule(wait, E::ReceiveReport, dst, H::CheckRecoverResult));
        }
        rules.push(rule(wait, E::ReportFail, S::NotifyKillJob, H::KillJob));
        rules.push(rule(wait, E::ReportTimeout, S::NotifyKillJob, H::KillJob));
    }

    // collaborator failures
    for src in [
        S::NotifyWaitFaultFlushing,
        S::NotifyGlobalFault,
        S::NotifyRestartAllProcess,
    ] {
        rules.push(rule(src, E::OperateConfigMapError, S::FaultClear, H::FaultClear));
    }
    for src in [S::NotifyDecidedStrategy, S::CheckRecoverResult] {
        rules.push(rule(src, E::OperatePodGroupError, S::NotifyKillJob, H::KillJob));
    }

    rules
}

// ── StateMachine ──────────────────────────────────────────────────────────────

/// A successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub src: State,
    pub event: Event,
    pub dst: State,
    pub handler: Option<Handler>,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    job: String,
    state: State,
    rules: Vec<Rule>,
}

impl StateMachine {
    pub fn new(job: impl Into<String>) -> Self {
        Self::with_rules(job, recover_rules())
    }

    pub fn with_rules(job: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            job: job.into(),
            state: State::Init,
            rules,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn can(&self, event: Event) -> bool {
        self.find(event).is_some()
    }

    /// Apply `event`.  Leaves the state untouched when no rule matches.
    pub fn trigger(&mut self, event: Event) -> Result<Transition, TransitionError> {
        let Some(rule) = self.find(event) else {
            warn!(job = %self.job, state = %self.state, event = %event, "order mix, event dropped");
            return Err(TransitionError::OrderMix {
                state: self.state,
                event,
            });
        };
        let transition = Transition {
            src: rule.src,
            event,
            dst: rule.dst,
            handler: rule.handler,
        };
        debug!(job = %self.job, src = %transition.src, event = %event, dst = %transition.dst, "transition");
        self.state = transition.dst;
        Ok(transition)
    }

    /// Force the machine back to [`State::Init`].
    pub fn reset(&mut self) {
        self.state = State::Init;
    }

    fn find(&self, event: Event) -> Option<Rule> {
        self.rules
            .iter()
            .find(|r| r.src == self.state && r.event == event)
            .copied()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

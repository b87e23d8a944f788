/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-job event controller.
//!
//! Each registered job owns one [`EventController`] running two background
//! tasks:
//!
//! * the **event loop**, which takes events off the job's event channel and
//!   drives the [`StateMachine`], running each transition's handler and
//!   feeding the handler's follow-up event straight back in;
//! * the **keep-alive ticker**, which pushes `KeepAlive` signals while an
//!   agent is subscribed and no real signal is queued.
//!
//! Only the latest subscription forwards signals.  Subscribing again cancels
//! the previous forwarder, and only the current one may mark the job
//! unsubscribed.
//!
//! All mutable job state sits behind one `RwLock`.  Channel handles are
//! cloned under the lock and used after it is released, so no lock is held
//! across an await.  [`EventController::reset`] cancels the job's token,
//! closes its channels and, unless the job is being deleted, reopens them
//! and restarts both tasks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{
    retry_get_pod_group, retry_patch_pod_group_annotations, retry_write_reset_cm, ClusterBackend, ResetCmOp,
    PROCESS_CONFIRM_FAULT_KEY, PROCESS_RECOVER_STRATEGY_KEY, PROCESS_RESULT_FAULT_KEY,
};
use crate::channel::{ChannelError, Mailbox};
use crate::config::RecoverConfig;
use crate::error::{RecoverCode, RecoverError, TransitionError};
use crate::fault::{FaultCache, FaultRank, RetryContext};
use crate::machine::{Event, Handler, HandlerResult, Next, State, StateMachine};
use crate::proto::{
    ProcessManageSignal, RecoverStatusRequest, RecoverStrategyRequest, SignalType, StopCompleteRequest,
    StressTestRankParams, StressTestResult, SwitchNicsRequest, SwitchRankList, SwitchResult,
};
use crate::strategy::{choose_strategy, parse_supported, DecisionInput, RecoverStrategy};

// ── RecoverProfile ────────────────────────────────────────────────────────────

/// Registration-time description of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverProfile {
    pub job_id: String,
    pub namespace: String,
    pub pod_group: String,
    /// Strategy negotiation goes through PodGroup annotations.
    pub platform_mode: bool,
    /// The job may step-retry on UCE / HCCL faults.
    pub support_retry: bool,
    pub restart_fault_process: bool,
    /// The job may restart every process when process-level recovery fails.
    pub restart_all_process: bool,
    pub elastic: bool,
}

impl RecoverProfile {
    pub fn new(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self {
            pod_group: job_id.clone(),
            job_id,
            namespace: "default".to_string(),
            platform_mode: false,
            support_retry: true,
            restart_fault_process: false,
            restart_all_process: false,
            elastic: false,
        }
    }
}

// ── Controller state ──────────────────────────────────────────────────────────

struct ControllerState {
    faults: FaultCache,
    supported: BTreeSet<RecoverStrategy>,
    decided: Option<RecoverStrategy>,
    failed: Option<RecoverStrategy>,
    latest_result: Option<RecoverStatusRequest>,
    restart_all_attempted: bool,
    retried_again: bool,
    cancel: CancellationToken,
    deleted: bool,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            faults: FaultCache::default(),
            supported: BTreeSet::new(),
            decided: None,
            failed: None,
            latest_result: None,
            restart_all_attempted: false,
            retried_again: false,
            cancel: CancellationToken::new(),
            deleted: false,
        }
    }

    fn clear_episode(&mut self) {
        self.faults.clear();
        self.supported.clear();
        self.decided = None;
        self.failed = None;
        self.latest_result = None;
        self.restart_all_attempted = false;
        self.retried_again = false;
    }
}

/// Reports flowing in from the agent.
struct ReportIn {
    stop_complete: Mailbox<StopCompleteRequest>,
    strategy: Mailbox<RecoverStrategyRequest>,
    status: Mailbox<RecoverStatusRequest>,
    switch_result: Mailbox<SwitchResult>,
    stress_result: Mailbox<StressTestResult>,
}

impl ReportIn {
    fn new(capacity: usize) -> Self {
        Self {
            stop_complete: Mailbox::new("stop-complete", capacity),
            strategy: Mailbox::new("recover-strategy", capacity),
            status: Mailbox::new("recover-status", capacity),
            switch_result: Mailbox::new("switch-result", capacity),
            stress_result: Mailbox::new("stress-result", capacity),
        }
    }

    fn close(&self) {
        self.stop_complete.close();
        self.strategy.close();
        self.status.close();
        self.switch_result.close();
        self.stress_result.close();
    }

    fn reopen(&self) {
        self.stop_complete.reopen();
        self.strategy.reopen();
        self.status.reopen();
        self.switch_result.reopen();
        self.stress_result.reopen();
    }
}

// ── EventController ───────────────────────────────────────────────────────────

pub struct EventController {
    profile: RecoverProfile,
    cfg: RecoverConfig,
    backend: Arc<dyn ClusterBackend>,
    state: RwLock<ControllerState>,
    machine: Mutex<StateMachine>,
    events: Mailbox<Event>,
    schedule_result: Mailbox<bool>,
    reports: ReportIn,
    signals: Mailbox<ProcessManageSignal>,
    subscription: Mutex<Subscription>,
}

/// The agent subscription currently forwarding signals, if any.
#[derive(Default)]
struct Subscription {
    generation: u64,
    active: Option<CancellationToken>,
}

/// Handle held by one signal forwarder.
#[derive(Debug, Clone)]
pub struct SubscriptionTicket {
    pub generation: u64,
    /// Cancelled when a newer subscription replaces this one.
    pub superseded: CancellationToken,
}

fn stay() -> HandlerResult {
    HandlerResult {
        next: Next::Stay,
        code: RecoverCode::ServerInnerError,
    }
}

/// Map the outcome of a notification to the machine's follow-up event.
fn notified(result: Result<(), RecoverError>) -> HandlerResult {
    match result {
        Ok(()) => HandlerResult::next(Event::NotifySuccess),
        Err(e) if e.is_cancelled() => stay(),
        Err(e) => HandlerResult::fail(Event::NotifyFail, e.code()),
    }
}

/// Map a failed collaborator call to the machine's follow-up event.
fn collaborator_failed(e: RecoverError, event: Event) -> HandlerResult {
    if e.is_cancelled() {
        return stay();
    }
    HandlerResult::fail(event, e.code())
}

fn fault_infos(faults: &[FaultRank]) -> Vec<crate::proto::FaultRankInfo> {
    faults.iter().map(FaultRank::to_info).collect()
}

impl EventController {
    pub fn new(profile: RecoverProfile, cfg: RecoverConfig, backend: Arc<dyn ClusterBackend>) -> Self {
        let capacity = cfg.queue_len();
        Self {
            machine: Mutex::new(StateMachine::new(profile.job_id.clone())),
            profile,
            cfg,
            backend,
            state: RwLock::new(ControllerState::new()),
            events: Mailbox::new("event", capacity),
            schedule_result: Mailbox::new("schedule-result", capacity),
            reports: ReportIn::new(capacity),
            signals: Mailbox::new("signal", capacity),
            subscription: Mutex::new(Subscription::default()),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.profile.job_id
    }

    pub fn profile(&self) -> &RecoverProfile {
        &self.profile
    }

    /// Spawn the event loop and the keep-alive ticker.
    pub fn start(self: &Arc<Self>) {
        let cancel = self.cancel_token();
        self.spawn_tasks(cancel);
        info!(job = %self.profile.job_id, "event controller started");
    }

    pub fn current_state(&self) -> State {
        self.machine.lock().state()
    }

    pub fn is_deleted(&self) -> bool {
        self.state.read().deleted
    }

    /// Make a new agent subscription current, cancelling the previous one.
    pub fn begin_subscription(&self) -> SubscriptionTicket {
        let mut sub = self.subscription.lock();
        if let Some(previous) = sub.active.take() {
            previous.cancel();
            info!(job = %self.profile.job_id, generation = sub.generation, "previous subscription superseded");
        }
        sub.generation += 1;
        let superseded = CancellationToken::new();
        sub.active = Some(superseded.clone());
        SubscriptionTicket {
            generation: sub.generation,
            superseded,
        }
    }

    /// End the subscription `generation`.  Returns `false` when a newer one
    /// has already replaced it, in which case nothing changes.
    pub fn end_subscription(&self, generation: u64) -> bool {
        let mut sub = self.subscription.lock();
        if sub.generation != generation {
            return false;
        }
        sub.active = None;
        true
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().active.is_some()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.state.read().cancel.clone()
    }

    fn channel_error(&self, channel: &'static str, e: ChannelError) -> RecoverError {
        let job = self.profile.job_id.clone();
        match e {
            ChannelError::Closed => RecoverError::ChannelClosed { job, channel },
            ChannelError::Busy => RecoverError::QueueBusy { job, channel },
            ChannelError::Cancelled => RecoverError::Cancelled { job },
            ChannelError::Timeout => RecoverError::SendTimeout { job, channel },
        }
    }

    /// Abort the current episode and start clean.
    ///
    /// With `deleting` the controller stays closed for good.  The outbound
    /// signal channel survives a plain reset so an already queued
    /// `KillMaster` still reaches the agent.
    pub fn reset(self: &Arc<Self>, deleting: bool) {
        let mut st = self.state.write();
        if st.deleted {
            return;
        }
        st.cancel.cancel();
        st.clear_episode();
        self.machine.lock().reset();
        self.events.close();
        self.schedule_result.close();
        self.reports.close();

        if deleting {
            st.deleted = true;
            self.signals.close();
            info!(job = %self.profile.job_id, "event controller closed");
            return;
        }

        self.events.reopen();
        self.schedule_result.reopen();
        self.reports.reopen();
        st.cancel = CancellationToken::new();
        let cancel = st.cancel.clone();
        drop(st);

        info!(job = %self.profile.job_id, "event controller reset");
        self.spawn_tasks(cancel);
    }

    fn spawn_tasks(self: &Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(self.clone().event_loop(cancel.clone()));
        tokio::spawn(self.clone().keep_alive(cancel));
    }

    // ── Inputs ────────────────────────────────────────────────────────────

    /// Queue an event for the event loop.
    pub fn add_event(&self, event: Event) -> Result<(), RecoverError> {
        debug!(job = %self.profile.job_id, %event, "event queued");
        self.events
            .try_send(event)
            .map_err(|e| self.channel_error(self.events.name(), e))
    }

    /// Cache a fault and start an episode when none is running.
    pub fn add_fault(&self, fault: FaultRank) -> Result<(), RecoverError> {
        let added = {
            let mut st = self.state.write();
            if st.deleted {
                return Err(RecoverError::ChannelClosed {
                    job: self.profile.job_id.clone(),
                    channel: self.events.name(),
                });
            }
            st.faults.add(fault)
        };
        if added && self.current_state() == State::Init {
            self.add_event(Event::FaultOccur)?;
        }
        Ok(())
    }

    fn accept_report<T: Send>(&self, mailbox: &Mailbox<T>, report: T) -> Result<(), RecoverError> {
        let state = self.current_state();
        if state == State::Init {
            return Err(TransitionError::OrderMix {
                state,
                event: Event::ReceiveReport,
            }
            .into());
        }
        mailbox
            .try_send(report)
            .map_err(|e| self.channel_error(mailbox.name(), e))
    }

    pub fn report_stop_complete(&self, req: StopCompleteRequest) -> Result<(), RecoverError> {
        self.accept_report(&self.reports.stop_complete, req)
    }

    pub fn report_recover_strategy(&self, req: RecoverStrategyRequest) -> Result<(), RecoverError> {
        self.accept_report(&self.reports.strategy, req)
    }

    pub fn report_recover_status(&self, req: RecoverStatusRequest) -> Result<(), RecoverError> {
        self.accept_report(&self.reports.status, req)
    }

    pub fn report_switch_result(&self, res: SwitchResult) -> Result<(), RecoverError> {
        self.reports
            .switch_result
            .try_send(res)
            .map_err(|e| self.channel_error(self.reports.switch_result.name(), e))
    }

    pub fn report_stress_test_result(&self, res: StressTestResult) -> Result<(), RecoverError> {
        self.reports
            .stress_result
            .try_send(res)
            .map_err(|e| self.channel_error(self.reports.stress_result.name(), e))
    }

    /// Result of rescheduling the job's faulted pods.
    pub fn notify_schedule_result(&self, success: bool) -> Result<(), RecoverError> {
        self.schedule_result
            .try_send(success)
            .map_err(|e| self.channel_error(self.schedule_result.name(), e))
    }

    /// Next outbound signal for the subscribed agent.
    pub async fn next_signal(&self) -> Result<ProcessManageSignal, RecoverError> {
        let cancel = self.cancel_token();
        self.signals
            .recv(&cancel, None)
            .await
            .map_err(|e| self.channel_error(self.signals.name(), e))
    }

    pub(crate) async fn send_signal(
        &self,
        signal: ProcessManageSignal,
        cancel: &CancellationToken,
    ) -> Result<(), RecoverError> {
        let kind = signal.signal_type.clone();
        match self.signals.send(signal, cancel, self.cfg.send_timeout()).await {
            Ok(()) => {
                info!(job = %self.profile.job_id, signal = %kind, "signal sent");
                Ok(())
            }
            Err(e) => {
                warn!(job = %self.profile.job_id, signal = %kind, error = %e, "signal send failed");
                Err(self.channel_error(self.signals.name(), e))
            }
        }
    }

    // ── Requests outside a fault episode ──────────────────────────────────

    fn ensure_idle(&self) -> Result<CancellationToken, RecoverError> {
        let state = self.current_state();
        if state != State::Init {
            return Err(RecoverError::Busy {
                job: self.profile.job_id.clone(),
                state,
            });
        }
        Ok(self.cancel_token())
    }

    async fn wait_reply<T: Send>(&self, mailbox: &Mailbox<T>, cancel: &CancellationToken) -> Result<T, RecoverError> {
        mailbox
            .recv(cancel, Some(self.cfg.report_timeout()))
            .await
            .map_err(|e| match e {
                ChannelError::Timeout => RecoverError::ReportTimeout {
                    job: self.profile.job_id.clone(),
                    channel: mailbox.name(),
                },
                other => self.channel_error(mailbox.name(), other),
            })
    }

    /// Ask the agent to switch NICs of the given ranks and wait for its answer.
    pub async fn hot_switch(&self, req: SwitchNicsRequest) -> Result<SwitchResult, RecoverError> {
        let cancel = self.ensure_idle()?;
        if req.node_rank_ids.len() != req.ops.len() {
            return Err(RecoverError::InvalidRequest {
                job: self.profile.job_id.clone(),
                reason: format!("{} ranks but {} ops", req.node_rank_ids.len(), req.ops.len()),
            });
        }
        let params = SwitchRankList {
            rank_ids: req.node_rank_ids.clone(),
            ops: req.ops,
        };
        let mut signal = ProcessManageSignal::new(&self.profile.job_id, SignalType::HotSwitch);
        signal.node_rank_ids = req.node_rank_ids;
        signal.extra_params = self.encode(&params)?;
        signal.timeout = self.cfg.report_timeout_secs as i64;

        self.reports.switch_result.drain();
        self.send_signal(signal, &cancel).await?;
        let result = self.wait_reply(&self.reports.switch_result, &cancel).await?;
        info!(job = %self.profile.job_id, result = result.result, "hot switch finished");
        Ok(result)
    }

    /// Ask the agent to stress-test the given ranks and wait for its answer.
    pub async fn stress_test(&self, req: StressTestRankParams) -> Result<StressTestResult, RecoverError> {
        let cancel = self.ensure_idle()?;
        if req.rank_ids.is_empty() {
            return Err(RecoverError::InvalidRequest {
                job: self.profile.job_id.clone(),
                reason: "no ranks to test".to_string(),
            });
        }
        let mut signal = ProcessManageSignal::new(&self.profile.job_id, SignalType::StressTest);
        signal.node_rank_ids = req.rank_ids.clone();
        signal.extra_params = self.encode(&req)?;
        signal.timeout = self.cfg.report_timeout_secs as i64;

        self.reports.stress_result.drain();
        self.send_signal(signal, &cancel).await?;
        let result = self.wait_reply(&self.reports.stress_result, &cancel).await?;
        info!(job = %self.profile.job_id, ranks = result.results.len(), "stress test finished");
        Ok(result)
    }

    fn encode<T: serde::Serialize>(&self, params: &T) -> Result<String, RecoverError> {
        serde_json::to_string(params).map_err(|e| RecoverError::InvalidRequest {
            job: self.profile.job_id.clone(),
            reason: e.to_string(),
        })
    }

    /// Put back a signal a closed subscription pulled but could not deliver.
    pub fn requeue_signal(&self, signal: ProcessManageSignal) {
        if signal.is(SignalType::KeepAlive) {
            return;
        }
        let kind = signal.signal_type.clone();
        if let Err(e) = self.signals.try_send(signal) {
            warn!(job = %self.profile.job_id, signal = %kind, error = %e, "undelivered signal dropped");
        }
    }

    // ── Background tasks ──────────────────────────────────────────────────

    async fn event_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            match self.events.recv(&cancel, None).await {
                Ok(event) => self.drive(event, &cancel).await,
                Err(e) => {
                    debug!(job = %self.profile.job_id, reason = %e, "event loop stopped");
                    return;
                }
            }
        }
    }

    async fn keep_alive(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.keep_alive_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if !self.is_subscribed() {
                continue;
            }
            if !self.signals.is_empty() {
                debug!(job = %self.profile.job_id, "keep-alive skipped: signals pending");
                continue;
            }
            let signal = ProcessManageSignal::new(&self.profile.job_id, SignalType::KeepAlive);
            if let Err(e) = self.signals.try_send(signal) {
                debug!(job = %self.profile.job_id, error = %e, "keep-alive skipped");
            }
        }
    }

    /// Run `event` and every follow-up event its handlers produce.
    async fn drive(self: &Arc<Self>, mut event: Event, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let transition = self.machine.lock().trigger(event);
            let Ok(transition) = transition else {
                return;
            };
            let Some(handler) = transition.handler else {
                return;
            };
            let result = self.run(handler, cancel).await;
            if !result.code.is_ok() {
                warn!(
                    job = %self.profile.job_id,
                    state = %transition.dst,
                    ?handler,
                    code = ?result.code,
                    "handler reported failure"
                );
            }
            match result.next {
                Next::Stay => return,
                Next::Transition(next) => event = next,
                Next::Terminal => {
                    self.reset(false);
                    return;
                }
            }
        }
    }

    async fn run(&self, handler: Handler, cancel: &CancellationToken) -> HandlerResult {
        match handler {
            Handler::NotifyFaultFlushing => self.handle_notify_fault_flushing(cancel).await,
            Handler::NotifyStopTrain => self.handle_notify_stop_train(cancel).await,
            Handler::WaitStopComplete => self.handle_wait_stop_complete(cancel).await,
            Handler::WaitFaultFlush => self.handle_wait_fault_flush(cancel).await,
            Handler::NotifyGlobalFault => self.handle_notify_global_fault(cancel).await,
            Handler::WaitRecoverStrategy => self.handle_wait_recover_strategy(cancel).await,
            Handler::DecideStrategy => self.handle_decide_strategy(cancel).await,
            Handler::WaitRecoverStatus => self.handle_wait_recover_status(cancel).await,
            Handler::KillPodForRetry => self.handle_kill_pod_for_retry(cancel).await,
            Handler::ListenSchedule => self.handle_listen_schedule(cancel).await,
            Handler::NotifyDump => self.handle_notify_dump(cancel).await,
            Handler::CheckRecoverResult => self.handle_check_recover_result(cancel).await,
            Handler::NotifyRestartAll => self.handle_notify_restart_all(cancel).await,
            Handler::FaultRetry => self.handle_fault_retry(),
            Handler::FaultClear => self.handle_fault_clear(cancel).await,
            Handler::KillJob => self.handle_kill_job(cancel).await,
            Handler::Reset => {
                info!(job = %self.profile.job_id, "fault episode finished");
                HandlerResult::terminal()
            }
        }
    }

    // ── Handlers ──────────────────────────────────────────────────────────

    fn faults(&self) -> Vec<FaultRank> {
        self.state.read().faults.all()
    }

    fn signal_with_faults(&self, kind: SignalType) -> ProcessManageSignal {
        let mut signal = ProcessManageSignal::new(&self.profile.job_id, kind);
        signal.fault_ranks = fault_infos(&self.faults());
        signal.timeout = self.cfg.report_timeout_secs as i64;
        signal
    }

    async fn write_reset_cm(&self, op: ResetCmOp, cancel: &CancellationToken) -> Result<(), RecoverError> {
        let faults = self.faults();
        retry_write_reset_cm(self.backend.as_ref(), &self.cfg, cancel, &self.profile, op, &faults).await
    }

    async fn wait_report<T: Send>(
        &self,
        mailbox: &Mailbox<T>,
        cancel: &CancellationToken,
    ) -> Result<T, HandlerResult> {
        match mailbox.recv(cancel, Some(self.cfg.report_timeout())).await {
            Ok(report) => Ok(report),
            Err(ChannelError::Timeout) => {
                warn!(job = %self.profile.job_id, channel = mailbox.name(), "report timed out");
                Err(HandlerResult::fail(Event::ReportTimeout, RecoverCode::ServerInnerError))
            }
            Err(e) => {
                debug!(job = %self.profile.job_id, channel = mailbox.name(), reason = %e, "report wait aborted");
                Err(stay())
            }
        }
    }

    async fn handle_notify_fault_flushing(&self, cancel: &CancellationToken) -> HandlerResult {
        match self.write_reset_cm(ResetCmOp::NotifyFaultFlushing, cancel).await {
            Ok(()) => HandlerResult::next(Event::NotifySuccess),
            Err(e) => collaborator_failed(e, Event::OperateConfigMapError),
        }
    }

    async fn handle_notify_stop_train(&self, cancel: &CancellationToken) -> HandlerResult {
        let signal = self.signal_with_faults(SignalType::StopTrain);
        notified(self.send_signal(signal, cancel).await)
    }

    async fn handle_wait_stop_complete(&self, cancel: &CancellationToken) -> HandlerResult {
        let report = match self.wait_report(&self.reports.stop_complete, cancel).await {
            Ok(r) => r,
            Err(result) => return result,
        };
        let code = report
            .status
            .as_ref()
            .map_or(RecoverCode::ClientError, |s| s.recover_code());
        if code.is_ok() {
            HandlerResult::next(Event::ReceiveReport)
        } else {
            warn!(job = %self.profile.job_id, ?code, "agent failed to stop training");
            HandlerResult::fail(Event::ReportFail, code)
        }
    }

    async fn handle_wait_fault_flush(&self, cancel: &CancellationToken) -> HandlerResult {
        tokio::select! {
            _ = cancel.cancelled() => stay(),
            _ = tokio::time::sleep(self.cfg.fault_flush_timeout()) => HandlerResult::next(Event::ReceiveReport),
        }
    }

    fn retry_context(&self, st: &ControllerState) -> RetryContext {
        RetryContext {
            retry_failed: st.failed == Some(RecoverStrategy::Retry),
            support_retry: self.profile.support_retry,
        }
    }

    async fn handle_notify_global_fault(&self, cancel: &CancellationToken) -> HandlerResult {
        {
            let mut st = self.state.write();
            let ctx = self.retry_context(&st);
            st.faults.take_retry_fault_to_normal_fault(ctx);
        }
        if let Err(e) = self.write_reset_cm(ResetCmOp::NotifyFaultList, cancel).await {
            return collaborator_failed(e, Event::OperateConfigMapError);
        }
        let signal = self.signal_with_faults(SignalType::GlobalFault);
        notified(self.send_signal(signal, cancel).await)
    }

    async fn handle_wait_recover_strategy(&self, cancel: &CancellationToken) -> HandlerResult {
        let report = match self.wait_report(&self.reports.strategy, cancel).await {
            Ok(r) => r,
            Err(result) => return result,
        };
        let supported = parse_supported(&report.strategies);
        info!(job = %self.profile.job_id, ?supported, "agent reported supported strategies");
        self.state.write().supported = supported;
        HandlerResult::next(Event::ReceiveReport)
    }

    async fn handle_decide_strategy(&self, cancel: &CancellationToken) -> HandlerResult {
        let mut input = {
            let mut st = self.state.write();
            let ctx = self.retry_context(&st);
            st.faults.take_retry_fault_to_normal_fault(ctx);
            DecisionInput {
                supported: st.supported.clone(),
                has_normal_fault: st.faults.has_normal_fault(),
                restart_fault_process: self.profile.restart_fault_process,
                elastic: self.profile.elastic,
                rank0_faulted: st.faults.rank_faulted("0"),
                resources_available: false,
                failed: st.failed,
            }
        };
        input.resources_available = self.backend.has_free_resources(&self.profile).await;
        let mut strategy = choose_strategy(&input);

        if self.profile.platform_mode {
            let annotations =
                match retry_get_pod_group(self.backend.as_ref(), &self.cfg, cancel, &self.profile).await {
                    Ok(a) => a,
                    Err(e) => return collaborator_failed(e, Event::OperatePodGroupError),
                };
            let platform_choice = annotations
                .get(PROCESS_RECOVER_STRATEGY_KEY)
                .and_then(|v| v.parse::<RecoverStrategy>().ok())
                .filter(|s| input.supported.contains(s));
            if let Some(choice) = platform_choice {
                info!(job = %self.profile.job_id, local = %strategy, platform = %choice, "platform strategy applied");
                strategy = choice;
            }
            let ranks: Vec<String> = self.faults().into_iter().map(|f| f.rank_id).collect();
            let patch = HashMap::from([(PROCESS_CONFIRM_FAULT_KEY.to_string(), ranks.join(","))]);
            if let Err(e) =
                retry_patch_pod_group_annotations(self.backend.as_ref(), &self.cfg, cancel, &self.profile, patch).await
            {
                return collaborator_failed(e, Event::OperatePodGroupError);
            }
        }

        let failed = {
            let mut st = self.state.write();
            st.decided = Some(strategy);
            st.failed
        };
        info!(job = %self.profile.job_id, %strategy, ?failed, "recover strategy decided");

        let event = match strategy {
            RecoverStrategy::Dump => return HandlerResult::next(Event::DumpStrategy),
            RecoverStrategy::Exit => return HandlerResult::next(Event::ExitStrategy),
            RecoverStrategy::Retry => Event::RetryStrategy,
            RecoverStrategy::Recover if failed == Some(RecoverStrategy::Retry) => Event::KillPod,
            RecoverStrategy::Recover => Event::WaitSchedule,
            RecoverStrategy::RecoverInPlace | RecoverStrategy::ScaleIn | RecoverStrategy::ScaleOut => {
                Event::ProcessRecoverStrategy
            }
        };

        let mut signal = self.signal_with_faults(SignalType::ChangeStrategy);
        signal.change_strategy = strategy.as_str().to_string();
        match self.send_signal(signal, cancel).await {
            Ok(()) => HandlerResult::next(event),
            Err(e) => collaborator_failed(e, Event::NotifyFail),
        }
    }

    async fn handle_wait_recover_status(&self, cancel: &CancellationToken) -> HandlerResult {
        let report = match self.wait_report(&self.reports.status, cancel).await {
            Ok(r) => r,
            Err(result) => return result,
        };
        if report.status.is_none() {
            warn!(job = %self.profile.job_id, "recover status report without status");
            return HandlerResult::fail(Event::ReportFail, RecoverCode::ClientError);
        }
        self.state.write().latest_result = Some(report);
        HandlerResult::next(Event::ReceiveReport)
    }

    async fn handle_kill_pod_for_retry(&self, cancel: &CancellationToken) -> HandlerResult {
        let signal = self.signal_with_faults(SignalType::FaultNodesExit);
        notified(self.send_signal(signal, cancel).await)
    }

    async fn handle_listen_schedule(&self, cancel: &CancellationToken) -> HandlerResult {
        let faults = self.state.read().faults.normal_faults().to_vec();
        if let Err(e) = self.backend.kill_fault_pods(&self.profile, &faults).await {
            error!(job = %self.profile.job_id, error = %format!("{e:#}"), "failed to delete fault pods");
            return HandlerResult::fail(Event::NotifyFail, RecoverCode::ServerInnerError);
        }
        match self
            .schedule_result
            .recv(cancel, Some(self.cfg.schedule_timeout()))
            .await
        {
            Ok(true) => HandlerResult::next(Event::ScheduleSuccess),
            Ok(false) => HandlerResult::fail(Event::NotifyFail, RecoverCode::ServerInnerError),
            Err(ChannelError::Timeout) => {
                warn!(job = %self.profile.job_id, "rescheduling timed out");
                HandlerResult::fail(Event::ScheduleTimeout, RecoverCode::ScheduleTimeout)
            }
            Err(_) => stay(),
        }
    }

    async fn handle_notify_dump(&self, cancel: &CancellationToken) -> HandlerResult {
        let signal = self.signal_with_faults(SignalType::SaveAndExit);
        notified(self.send_signal(signal, cancel).await)
    }

    async fn handle_check_recover_result(&self, cancel: &CancellationToken) -> HandlerResult {
        let (report, decided) = {
            let st = self.state.read();
            (st.latest_result.clone(), st.decided)
        };
        let code = report.as_ref().map_or(RecoverCode::ClientError, RecoverStatusRequest::code);
        info!(job = %self.profile.job_id, ?decided, ?code, "recover result received");

        if self.profile.platform_mode {
            let result = serde_json::json!({
                "strategy": decided.map(RecoverStrategy::as_str).unwrap_or_default(),
                "code": code as i32,
                "isolateRankIds": report.as_ref().map(|r| r.isolate_rank_ids.clone()).unwrap_or_default(),
            });
            let patch = HashMap::from([(PROCESS_RESULT_FAULT_KEY.to_string(), result.to_string())]);
            if let Err(e) =
                retry_patch_pod_group_annotations(self.backend.as_ref(), &self.cfg, cancel, &self.profile, patch).await
            {
                return collaborator_failed(e, Event::OperatePodGroupError);
            }
        }

        if code.is_ok() {
            return HandlerResult::next(Event::RecoverSuccess);
        }

        let mut st = self.state.write();
        let process_level = decided.is_some_and(RecoverStrategy::is_process_level);
        if code == RecoverCode::RecoverableRetryError && decided == Some(RecoverStrategy::Retry) && !st.retried_again {
            st.retried_again = true;
            return HandlerResult::fail(Event::RetryAgain, code);
        }
        if code == RecoverCode::ProcessRecoverFail
            && process_level
            && self.profile.restart_all_process
            && !st.restart_all_attempted
        {
            st.restart_all_attempted = true;
            return HandlerResult::fail(Event::RestartAll, code);
        }
        st.failed = decided;
        HandlerResult::fail(Event::RecoverFail, code)
    }

    async fn handle_notify_restart_all(&self, cancel: &CancellationToken) -> HandlerResult {
        match self.write_reset_cm(ResetCmOp::RestartAllProcess, cancel).await {
            Ok(()) => HandlerResult::next(Event::NotifySuccess),
            Err(e) => collaborator_failed(e, Event::OperateConfigMapError),
        }
    }

    fn handle_fault_retry(&self) -> HandlerResult {
        let mut st = self.state.write();
        st.decided = None;
        st.latest_result = None;
        info!(job = %self.profile.job_id, faults = st.faults.all().len(), "retrying fault episode");
        HandlerResult::next(Event::Restart)
    }

    async fn handle_fault_clear(&self, cancel: &CancellationToken) -> HandlerResult {
        if let Err(e) = self.write_reset_cm(ResetCmOp::Clear, cancel).await {
            if e.is_cancelled() {
                return stay();
            }
            error!(job = %self.profile.job_id, error = %e, "failed to clear reset configmap");
        }
        HandlerResult::next(Event::Finish)
    }

    async fn handle_kill_job(&self, cancel: &CancellationToken) -> HandlerResult {
        let signal = self.signal_with_faults(SignalType::KillMaster);
        if let Err(e) = self.send_signal(signal, cancel).await {
            if e.is_cancelled() {
                return stay();
            }
            error!(job = %self.profile.job_id, error = %e, "kill signal was not delivered");
        }
        if let Err(e) = self.write_reset_cm(ResetCmOp::Clear, cancel).await {
            if e.is_cancelled() {
                return stay();
            }
            error!(job = %self.profile.job_id, error = %e, "failed to clear reset configmap");
        }
        HandlerResult::next(Event::Finish)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Recovery service: the registry of per-job controllers and the request
//! surface the transport layer calls into.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::backend::ClusterBackend;
use crate::config::RecoverConfig;
use crate::controller::{EventController, RecoverProfile};
use crate::error::RecoverError;
use crate::fault::{FaultRank, FaultType};
use crate::proto::{
    ClientInfo, FaultRankInfo, ProcessManageSignal, RecoverStatusRequest, RecoverStrategyRequest, Status,
    StopCompleteRequest, StressTestRankParams, StressTestResult, SwitchNicsRequest, SwitchResult,
};

/// Signal stream handed to a subscribed agent.
pub type SignalStream = ReceiverStream<Result<ProcessManageSignal, tonic::Status>>;

#[derive(Default)]
struct Registry {
    controllers: HashMap<String, Arc<EventController>>,
    infos: HashMap<String, RecoverProfile>,
}

pub struct RecoverService {
    cfg: RecoverConfig,
    backend: Arc<dyn ClusterBackend>,
    registry: Mutex<Registry>,
}

fn to_status(result: Result<(), RecoverError>) -> Status {
    match result {
        Ok(()) => Status::ok(),
        Err(e) => Status::new(e.code(), e.to_string()),
    }
}

impl RecoverService {
    pub fn new(cfg: RecoverConfig, backend: Arc<dyn ClusterBackend>) -> Self {
        Self {
            cfg,
            backend,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Record a job's registration info.  Repeat calls are no-ops.
    pub fn register(&self, profile: RecoverProfile) -> Result<(), RecoverError> {
        if profile.job_id.is_empty() {
            return Err(RecoverError::InvalidRequest {
                job: String::new(),
                reason: "empty job id".to_string(),
            });
        }
        let mut reg = self.registry.lock();
        if reg.infos.contains_key(&profile.job_id) {
            debug!(job = %profile.job_id, "job already registered");
            return Ok(());
        }
        info!(job = %profile.job_id, platform = profile.platform_mode, "job registered");
        reg.infos.insert(profile.job_id.clone(), profile);
        Ok(())
    }

    /// Create and start the controller of a registered job.  Repeat calls
    /// return the running controller.
    pub fn init(&self, job_id: &str) -> Result<Arc<EventController>, RecoverError> {
        let mut reg = self.registry.lock();
        if let Some(ctl) = reg.controllers.get(job_id) {
            return Ok(ctl.clone());
        }
        let profile = reg
            .infos
            .get(job_id)
            .cloned()
            .ok_or_else(|| RecoverError::JobNotRegistered { job: job_id.to_string() })?;
        let ctl = Arc::new(EventController::new(profile, self.cfg.clone(), self.backend.clone()));
        ctl.start();
        reg.controllers.insert(job_id.to_string(), ctl.clone());
        Ok(ctl)
    }

    pub fn controller(&self, job_id: &str) -> Option<Arc<EventController>> {
        self.registry.lock().controllers.get(job_id).cloned()
    }

    fn get(&self, job_id: &str) -> Result<Arc<EventController>, RecoverError> {
        self.controller(job_id)
            .ok_or_else(|| RecoverError::JobNotRegistered { job: job_id.to_string() })
    }

    /// Open the agent's signal stream.  A repeat subscription for the same
    /// job replaces the previous stream, which then ends.
    pub fn subscribe(&self, client: ClientInfo) -> Result<SignalStream, RecoverError> {
        let ctl = self.get(&client.job_id)?;
        let (tx, rx) = mpsc::channel(self.cfg.queue_len());
        let ticket = ctl.begin_subscription();
        info!(job = %client.job_id, role = %client.role, generation = ticket.generation, "agent subscribed");

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = ticket.superseded.cancelled() => break,
                    _ = tx.closed() => break,
                    next = ctl.next_signal() => next,
                };
                match next {
                    Ok(signal) => {
                        if let Err(mpsc::error::SendError(Ok(signal))) = tx.send(Ok(signal)).await {
                            ctl.requeue_signal(signal);
                            break;
                        }
                    }
                    Err(e) if ctl.is_deleted() => {
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                    Err(e) => debug!(job = %ctl.job_id(), reason = %e, "signal wait interrupted"),
                }
            }
            if ctl.end_subscription(ticket.generation) {
                info!(job = %ctl.job_id(), generation = ticket.generation, "agent subscription closed");
            } else {
                debug!(job = %ctl.job_id(), generation = ticket.generation, "superseded subscription stopped");
            }
        });
        Ok(ReceiverStream::new(rx))
    }

    /// Feed faults reported by the device plugin into the job's controller.
    pub fn notify_fault(&self, job_id: &str, faults: Vec<FaultRankInfo>) -> Result<(), RecoverError> {
        let ctl = self.get(job_id)?;
        for info in faults {
            let fault_type: FaultType = info.fault_type.parse().map_err(|reason| RecoverError::InvalidRequest {
                job: job_id.to_string(),
                reason,
            })?;
            ctl.add_fault(FaultRank::new(info.rank_id, fault_type))?;
        }
        Ok(())
    }

    pub fn notify_schedule_result(&self, job_id: &str, success: bool) -> Result<(), RecoverError> {
        self.get(job_id)?.notify_schedule_result(success)
    }

    pub fn report_stop_complete(&self, req: StopCompleteRequest) -> Status {
        to_status(self.get(&req.job_id).and_then(|ctl| ctl.report_stop_complete(req)))
    }

    pub fn report_recover_strategy(&self, req: RecoverStrategyRequest) -> Status {
        to_status(self.get(&req.job_id).and_then(|ctl| ctl.report_recover_strategy(req)))
    }

    pub fn report_recover_status(&self, req: RecoverStatusRequest) -> Status {
        to_status(self.get(&req.job_id).and_then(|ctl| ctl.report_recover_status(req)))
    }

    pub fn report_switch_result(&self, res: SwitchResult) -> Status {
        to_status(self.get(&res.job_id).and_then(|ctl| ctl.report_switch_result(res)))
    }

    pub fn report_stress_test_result(&self, res: StressTestResult) -> Status {
        to_status(self.get(&res.job_id).and_then(|ctl| ctl.report_stress_test_result(res)))
    }

    pub async fn switch_nics(&self, req: SwitchNicsRequest) -> Result<SwitchResult, RecoverError> {
        let ctl = self.get(&req.job_id)?;
        ctl.hot_switch(req).await
    }

    pub async fn stress_test(&self, req: StressTestRankParams) -> Result<StressTestResult, RecoverError> {
        let ctl = self.get(&req.job_id)?;
        ctl.stress_test(req).await
    }

    /// Close the job's controller and forget the job.
    pub fn delete_job(&self, job_id: &str) {
        let removed = {
            let mut reg = self.registry.lock();
            reg.infos.remove(job_id);
            reg.controllers.remove(job_id)
        };
        match removed {
            Some(ctl) => {
                ctl.reset(true);
                info!(job = %job_id, "job deleted");
            }
            None => warn!(job = %job_id, "delete of unknown job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_stream::StreamExt;

    use super::*;
    use crate::backend::testing::RecordingBackend;
    use crate::backend::ResetCmOp;
    use crate::error::RecoverCode;
    use crate::machine::State;
    use crate::proto::SignalType;

    fn cfg() -> RecoverConfig {
        RecoverConfig {
            keep_alive_interval_secs: 3600,
            fault_flush_timeout_secs: 0,
            retry_interval_millis: 1,
            ..Default::default()
        }
    }

    fn service(cfg: RecoverConfig) -> (RecoverService, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        (RecoverService::new(cfg, backend.clone()), backend)
    }

    fn client() -> ClientInfo {
        ClientInfo {
            job_id: "job".into(),
            role: "agent".into(),
        }
    }

    fn fault(rank: &str, kind: &str) -> FaultRankInfo {
        FaultRankInfo {
            rank_id: rank.into(),
            fault_type: kind.into(),
        }
    }

    async fn next_signal(stream: &mut SignalStream) -> ProcessManageSignal {
        loop {
            let signal = stream.next().await.unwrap().unwrap();
            if !signal.is(SignalType::KeepAlive) {
                return signal;
            }
        }
    }

    async fn wait_for_init(svc: &RecoverService, backend: &RecordingBackend) {
        for _ in 0..500 {
            let ctl = svc.controller("job").unwrap();
            if ctl.current_state() == State::Init && backend.reset_ops().contains(&ResetCmOp::Clear) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("controller never returned to init");
    }

    #[tokio::test]
    async fn register_and_init_are_idempotent() {
        let (svc, _) = service(cfg());
        assert!(matches!(svc.init("job"), Err(RecoverError::JobNotRegistered { .. })));

        svc.register(RecoverProfile::new("job")).unwrap();
        svc.register(RecoverProfile::new("job")).unwrap();
        let a = svc.init("job").unwrap();
        let b = svc.init("job").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        svc.delete_job("job");
    }

    #[tokio::test]
    async fn unknown_job_reports_job_not_exist() {
        let (svc, _) = service(cfg());
        let status = svc.report_stop_complete(StopCompleteRequest {
            job_id: "ghost".into(),
            status: Some(Status::ok()),
        });
        assert_eq!(status.recover_code(), RecoverCode::JobNotExist);
    }

    #[tokio::test]
    async fn delete_job_ends_the_subscription() {
        let (svc, _) = service(cfg());
        svc.register(RecoverProfile::new("job")).unwrap();
        svc.init("job").unwrap();
        let mut stream = svc.subscribe(client()).unwrap();

        svc.delete_job("job");
        assert!(svc.controller("job").is_none());
        let last = stream.next().await.unwrap();
        assert!(last.is_err());
        assert!(stream.next().await.is_none());
        assert!(matches!(svc.init("job"), Err(RecoverError::JobNotRegistered { .. })));
    }

    #[tokio::test]
    async fn retry_episode_runs_to_completion() {
        let (svc, backend) = service(cfg());
        svc.register(RecoverProfile::new("job")).unwrap();
        svc.init("job").unwrap();
        let mut stream = svc.subscribe(client()).unwrap();

        svc.notify_fault("job", vec![fault("1", "uce")]).unwrap();

        let stop = next_signal(&mut stream).await;
        assert!(stop.is(SignalType::StopTrain));
        assert_eq!(stop.fault_ranks[0].rank_id, "1");
        let ack = svc.report_stop_complete(StopCompleteRequest {
            job_id: "job".into(),
            status: Some(Status::ok()),
        });
        assert_eq!(ack.recover_code(), RecoverCode::Ok);

        let global = next_signal(&mut stream).await;
        assert!(global.is(SignalType::GlobalFault));
        assert_eq!(global.fault_ranks[0].fault_type, "uce");
        svc.report_recover_strategy(RecoverStrategyRequest {
            job_id: "job".into(),
            strategies: vec!["retry".into(), "recover".into(), "dump".into()],
        });

        let change = next_signal(&mut stream).await;
        assert!(change.is(SignalType::ChangeStrategy));
        assert_eq!(change.change_strategy, "retry");
        svc.report_recover_status(RecoverStatusRequest {
            job_id: "job".into(),
            status: Some(Status::ok()),
            strategy: "retry".into(),
            isolate_rank_ids: vec![],
        });

        wait_for_init(&svc, &backend).await;
        assert_eq!(
            backend.reset_ops(),
            vec![
                ResetCmOp::NotifyFaultFlushing,
                ResetCmOp::NotifyFaultList,
                ResetCmOp::Clear
            ]
        );
        svc.delete_job("job");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_report_kills_the_job() {
        let (svc, backend) = service(cfg());
        svc.register(RecoverProfile::new("job")).unwrap();
        svc.init("job").unwrap();
        let mut stream = svc.subscribe(client()).unwrap();

        svc.notify_fault("job", vec![fault("3", "normal")]).unwrap();
        assert!(next_signal(&mut stream).await.is(SignalType::StopTrain));

        let kill = next_signal(&mut stream).await;
        assert!(kill.is(SignalType::KillMaster));
        wait_for_init(&svc, &backend).await;
        svc.delete_job("job");
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_flows_while_subscribed() {
        let (svc, _) = service(RecoverConfig {
            keep_alive_interval_secs: 5,
            ..cfg()
        });
        svc.register(RecoverProfile::new("job")).unwrap();
        svc.init("job").unwrap();
        let mut stream = svc.subscribe(client()).unwrap();

        let signal = stream.next().await.unwrap().unwrap();
        assert!(signal.is(SignalType::KeepAlive));
        svc.delete_job("job");
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_replaces_the_previous_stream() {
        let (svc, _) = service(RecoverConfig {
            keep_alive_interval_secs: 5,
            ..cfg()
        });
        svc.register(RecoverProfile::new("job")).unwrap();
        let ctl = svc.init("job").unwrap();
        let mut stale = svc.subscribe(client()).unwrap();
        let mut live = svc.subscribe(client()).unwrap();

        assert!(stale.next().await.is_none(), "old stream ends");
        assert!(ctl.is_subscribed(), "old forwarder must not clear the new subscription");
        assert!(live.next().await.unwrap().unwrap().is(SignalType::KeepAlive));

        svc.notify_fault("job", vec![fault("2", "normal")]).unwrap();
        assert!(next_signal(&mut live).await.is(SignalType::StopTrain));
        svc.delete_job("job");
    }

    #[tokio::test]
    async fn unknown_fault_type_is_rejected() {
        let (svc, _) = service(cfg());
        svc.register(RecoverProfile::new("job")).unwrap();
        svc.init("job").unwrap();
        let err = svc.notify_fault("job", vec![fault("1", "cosmic-ray")]).unwrap_err();
        assert_eq!(err.code(), RecoverCode::ClientError);
        svc.delete_job("job");
    }
}

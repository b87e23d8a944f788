/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cluster-side collaborators of the recovery controller.
//!
//! The per-job reset ConfigMap and the PodGroup annotations live in the
//! cluster API server; [`ClusterBackend`] is the seam to it.  Every call is
//! wrapped in a fixed-count retry helper whose exhaustion surfaces as
//! [`RecoverCode::OperateConfigMapError`] or
//! [`RecoverCode::OperatePodGroupError`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RecoverConfig;
use crate::controller::RecoverProfile;
use crate::error::{RecoverCode, RecoverError};
use crate::fault::FaultRank;

/// PodGroup annotation carrying the platform's strategy choice.
pub const PROCESS_RECOVER_STRATEGY_KEY: &str = "ProcessRecoverStrategy";
/// PodGroup annotation listing the fault ranks of the current episode.
pub const PROCESS_CONFIRM_FAULT_KEY: &str = "ProcessConfirmFault";
/// PodGroup annotation carrying the recover result.
pub const PROCESS_RESULT_FAULT_KEY: &str = "ProcessResultFault";

/// Operation written into the reset ConfigMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetCmOp {
    Clear,
    NotifyFaultFlushing,
    NotifyFaultList,
    RestartAllProcess,
}

impl ResetCmOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ResetCmOp::Clear => "clear",
            ResetCmOp::NotifyFaultFlushing => "notify-fault-flushing",
            ResetCmOp::NotifyFaultList => "notify-fault-list",
            ResetCmOp::RestartAllProcess => "restart-all-process",
        }
    }
}

impl fmt::Display for ResetCmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Write `op` and the current fault list into the job's reset ConfigMap.
    async fn write_reset_cm(&self, job: &RecoverProfile, op: ResetCmOp, faults: &[FaultRank]) -> anyhow::Result<()>;

    async fn get_pod_group_annotations(&self, job: &RecoverProfile) -> anyhow::Result<HashMap<String, String>>;

    async fn patch_pod_group_annotations(
        &self,
        job: &RecoverProfile,
        annotations: HashMap<String, String>,
    ) -> anyhow::Result<()>;

    /// Delete the pods hosting `faults` so the scheduler can replace them.
    async fn kill_fault_pods(&self, job: &RecoverProfile, faults: &[FaultRank]) -> anyhow::Result<()>;

    /// Whether the cluster has room to reschedule the job's faulted pods.
    async fn has_free_resources(&self, job: &RecoverProfile) -> bool;
}

async fn with_retry<T, F, Fut>(
    cfg: &RecoverConfig,
    cancel: &CancellationToken,
    job: &RecoverProfile,
    op: &'static str,
    code: RecoverCode,
    mut call: F,
) -> Result<T, RecoverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = cfg.retry_times.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(job = %job.job_id, op, attempt, attempts, error = %format!("{e:#}"), "collaborator call failed");
                last = format!("{e:#}");
            }
        }
        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RecoverError::Cancelled { job: job.job_id.clone() }),
                _ = tokio::time::sleep(cfg.retry_interval()) => {}
            }
        }
    }
    Err(RecoverError::Collaborator {
        job: job.job_id.clone(),
        op,
        code,
        message: last,
    })
}

pub async fn retry_write_reset_cm(
    backend: &dyn ClusterBackend,
    cfg: &RecoverConfig,
    cancel: &CancellationToken,
    job: &RecoverProfile,
    op: ResetCmOp,
    faults: &[FaultRank],
) -> Result<(), RecoverError> {
    with_retry(
        cfg,
        cancel,
        job,
        "write reset configmap",
        RecoverCode::OperateConfigMapError,
        move || backend.write_reset_cm(job, op, faults),
    )
    .await
}

pub async fn retry_get_pod_group(
    backend: &dyn ClusterBackend,
    cfg: &RecoverConfig,
    cancel: &CancellationToken,
    job: &RecoverProfile,
) -> Result<HashMap<String, String>, RecoverError> {
    with_retry(
        cfg,
        cancel,
        job,
        "get podgroup",
        RecoverCode::OperatePodGroupError,
        move || backend.get_pod_group_annotations(job),
    )
    .await
}

pub async fn retry_patch_pod_group_annotations(
    backend: &dyn ClusterBackend,
    cfg: &RecoverConfig,
    cancel: &CancellationToken,
    job: &RecoverProfile,
    annotations: HashMap<String, String>,
) -> Result<(), RecoverError> {
    with_retry(
        cfg,
        cancel,
        job,
        "patch podgroup annotations",
        RecoverCode::OperatePodGroupError,
        move || backend.patch_pod_group_annotations(job, annotations.clone()),
    )
    .await
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// One recorded collaborator call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        ResetCm(ResetCmOp, Vec<String>),
        GetPodGroup,
        PatchPodGroup(HashMap<String, String>),
        KillFaultPods(Vec<String>),
    }

    /// In-memory backend that records calls and can be told to fail.
    #[derive(Default)]
    pub struct RecordingBackend {
        pub calls: Mutex<Vec<Call>>,
        pub annotations: Mutex<HashMap<String, String>>,
        pub fail_reset_cm: Mutex<u32>,
        pub fail_pod_group: Mutex<bool>,
        pub no_free_resources: Mutex<bool>,
    }

    impl RecordingBackend {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn reset_ops(&self) -> Vec<ResetCmOp> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::ResetCm(op, _) => Some(op),
                    _ => None,
                })
                .collect()
        }
    }

    fn ranks(faults: &[FaultRank]) -> Vec<String> {
        faults.iter().map(|f| f.rank_id.clone()).collect()
    }

    #[async_trait]
    impl ClusterBackend for RecordingBackend {
        async fn write_reset_cm(&self, _job: &RecoverProfile, op: ResetCmOp, faults: &[FaultRank]) -> anyhow::Result<()> {
            self.calls.lock().push(Call::ResetCm(op, ranks(faults)));
            let mut fail = self.fail_reset_cm.lock();
            if *fail > 0 {
                *fail -= 1;
                anyhow::bail!("configmap write refused");
            }
            Ok(())
        }

        async fn get_pod_group_annotations(&self, _job: &RecoverProfile) -> anyhow::Result<HashMap<String, String>> {
            self.calls.lock().push(Call::GetPodGroup);
            if *self.fail_pod_group.lock() {
                anyhow::bail!("podgroup not found");
            }
            Ok(self.annotations.lock().clone())
        }

        async fn patch_pod_group_annotations(
            &self,
            _job: &RecoverProfile,
            annotations: HashMap<String, String>,
        ) -> anyhow::Result<()> {
            self.calls.lock().push(Call::PatchPodGroup(annotations.clone()));
            if *self.fail_pod_group.lock() {
                anyhow::bail!("podgroup not found");
            }
            self.annotations.lock().extend(annotations);
            Ok(())
        }

        async fn kill_fault_pods(&self, _job: &RecoverProfile, faults: &[FaultRank]) -> anyhow::Result<()> {
            self.calls.lock().push(Call::KillFaultPods(ranks(faults)));
            Ok(())
        }

        async fn has_free_resources(&self, _job: &RecoverProfile) -> bool {
            !*self.no_free_resources.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingBackend;
    use super::*;
    use crate::fault::FaultType;

    fn cfg() -> RecoverConfig {
        RecoverConfig {
            retry_times: 3,
            retry_interval_millis: 10,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let backend = RecordingBackend::default();
        *backend.fail_reset_cm.lock() = 2;
        let job = RecoverProfile::new("job");
        let faults = [FaultRank::new("3", FaultType::Normal)];
        retry_write_reset_cm(&backend, &cfg(), &CancellationToken::new(), &job, ResetCmOp::NotifyFaultList, &faults)
            .await
            .unwrap();
        assert_eq!(backend.reset_ops().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_carry_the_operation_code() {
        let backend = RecordingBackend::default();
        *backend.fail_pod_group.lock() = true;
        let job = RecoverProfile::new("job");
        let err = retry_get_pod_group(&backend, &cfg(), &CancellationToken::new(), &job)
            .await
            .unwrap_err();
        assert_eq!(err.code(), RecoverCode::OperatePodGroupError);
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retrying() {
        let backend = RecordingBackend::default();
        *backend.fail_reset_cm.lock() = 10;
        let job = RecoverProfile::new("job");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = retry_write_reset_cm(&backend, &cfg(), &cancel, &job, ResetCmOp::Clear, &[])
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(backend.reset_ops().len(), 1);
    }
}

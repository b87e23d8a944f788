/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Recovery tuning.
//!
//! ```yaml
//! report_timeout_secs: 900
//! keep_alive_interval_secs: 5
//! fault_flush_timeout_secs: 10
//! schedule_timeout_secs: 300
//! send_timeout_secs: 5
//! retry_times: 3
//! retry_interval_millis: 200
//! signal_queue_len: 10
//! ```
//!
//! Every field is optional.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecoverConfig {
    /// How long to wait for any agent report.
    pub report_timeout_secs: u64,
    pub keep_alive_interval_secs: u64,
    /// Window in which further faults of the same episode are collected.
    pub fault_flush_timeout_secs: u64,
    /// How long to wait for rescheduled pods.
    pub schedule_timeout_secs: u64,
    /// Bound on one blocked channel send.
    pub send_timeout_secs: u64,
    /// Attempts for ConfigMap / PodGroup operations.
    pub retry_times: u32,
    pub retry_interval_millis: u64,
    /// Capacity of every per-job channel.
    pub signal_queue_len: usize,
}

impl Default for RecoverConfig {
    fn default() -> Self {
        Self {
            report_timeout_secs: 900,
            keep_alive_interval_secs: 5,
            fault_flush_timeout_secs: 10,
            schedule_timeout_secs: 300,
            send_timeout_secs: 5,
            retry_times: 3,
            retry_interval_millis: 200,
            signal_queue_len: 10,
        }
    }
}

impl RecoverConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open recovery config: {}", path.display()))?;
        let cfg: RecoverConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        info!(?cfg, "Recovery config loaded");
        Ok(cfg)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs.max(1))
    }

    pub fn fault_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.fault_flush_timeout_secs)
    }

    pub fn schedule_timeout(&self) -> Duration {
        Duration::from_secs(self.schedule_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_millis)
    }

    pub fn queue_len(&self) -> usize {
        self.signal_queue_len.max(1)
    }
}

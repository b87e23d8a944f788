/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Wire messages exchanged with the per-job training agent.
//!
//! The transport only needs the payloads, so the messages are declared by
//! hand with `prost` derives instead of being generated from `.proto` files.
//! They also derive `serde` so they can be logged or embedded as JSON.

use std::collections::HashMap;
use std::fmt;

use prost::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RecoverCode;

// ── Signal types ──────────────────────────────────────────────────────────────

/// Kind of a [`ProcessManageSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    StopTrain,
    GlobalFault,
    ChangeStrategy,
    SaveAndExit,
    KillMaster,
    FaultNodesExit,
    HotSwitch,
    StressTest,
    KeepAlive,
}

impl SignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::StopTrain => "stop_train",
            SignalType::GlobalFault => "global_fault",
            SignalType::ChangeStrategy => "change_strategy",
            SignalType::SaveAndExit => "save_and_exit",
            SignalType::KillMaster => "kill_master",
            SignalType::FaultNodesExit => "fault_nodes_exit",
            SignalType::HotSwitch => "hot_switch",
            SignalType::StressTest => "stress_test",
            SignalType::KeepAlive => "keep_alive",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Result code plus free text.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub info: String,
}

impl Status {
    pub fn new(code: RecoverCode, info: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            info: info.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(RecoverCode::Ok, "ok")
    }

    pub fn recover_code(&self) -> RecoverCode {
        RecoverCode::from_i32(self.code)
    }
}

/// A faulted rank as sent to the agent.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct FaultRankInfo {
    #[prost(string, tag = "1")]
    pub rank_id: String,
    #[prost(string, tag = "2")]
    pub fault_type: String,
}

/// Identity of the agent calling in.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct ClientInfo {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(string, tag = "2")]
    pub role: String,
}

/// Instruction streamed to the agent.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct ProcessManageSignal {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub job_id: String,
    #[prost(string, tag = "3")]
    pub signal_type: String,
    #[prost(string, repeated, tag = "4")]
    pub actions: Vec<String>,
    #[prost(message, repeated, tag = "5")]
    pub fault_ranks: Vec<FaultRankInfo>,
    #[prost(string, tag = "6")]
    pub change_strategy: String,
    #[prost(string, repeated, tag = "7")]
    pub node_rank_ids: Vec<String>,
    /// JSON document with signal-specific parameters.
    #[prost(string, tag = "8")]
    pub extra_params: String,
    /// Seconds the agent may take to act on the signal.
    #[prost(int64, tag = "9")]
    pub timeout: i64,
}

impl ProcessManageSignal {
    pub fn new(job_id: impl Into<String>, signal_type: SignalType) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            signal_type: signal_type.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn is(&self, signal_type: SignalType) -> bool {
        self.signal_type == signal_type.as_str()
    }
}

/// Outcome of a recovery attempt, reported by the agent.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct RecoverStatusRequest {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(message, optional, tag = "2")]
    pub status: Option<Status>,
    #[prost(string, tag = "3")]
    pub strategy: String,
    #[prost(string, repeated, tag = "4")]
    pub isolate_rank_ids: Vec<String>,
}

impl RecoverStatusRequest {
    pub fn code(&self) -> RecoverCode {
        self.status
            .as_ref()
            .map_or(RecoverCode::ClientError, Status::recover_code)
    }
}

/// Strategies the agent is able to run for the current fault.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct RecoverStrategyRequest {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(string, repeated, tag = "2")]
    pub strategies: Vec<String>,
}

/// The agent has stopped training.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct StopCompleteRequest {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(message, optional, tag = "2")]
    pub status: Option<Status>,
}

/// Request to switch NICs of some ranks.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct SwitchNicsRequest {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(string, repeated, tag = "2")]
    pub node_rank_ids: Vec<String>,
    /// `true` switches to the backup NIC, `false` back to the primary.
    #[prost(bool, repeated, tag = "3")]
    pub ops: Vec<bool>,
}

/// Rank-level switch plan carried in a hot-switch signal's `extra_params`.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct SwitchRankList {
    #[prost(string, repeated, tag = "1")]
    pub rank_ids: Vec<String>,
    #[prost(bool, repeated, tag = "2")]
    pub ops: Vec<bool>,
}

/// Agent's answer to a hot switch.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct SwitchResult {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(bool, tag = "2")]
    pub result: bool,
}

/// Request to run a stress test on some ranks.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct StressTestRankParams {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(string, repeated, tag = "2")]
    pub rank_ids: Vec<String>,
    /// Test operations to run on every listed rank.
    #[prost(int64, repeated, tag = "3")]
    pub ops: Vec<i64>,
}

/// Agent's answer to a stress test: rank id → verdict.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct StressTestResult {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(message, optional, tag = "2")]
    pub status: Option<Status>,
    #[prost(map = "string, string", tag = "3")]
    pub results: HashMap<String, String>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fault recovery for distributed NPU training jobs.
//!
//! ```text
//! RecoverService (registry: job id → EventController)
//!   └── EventController (one per job)
//!         ├── StateMachine      recover_rules() transition table
//!         ├── FaultCache        retry / normal faults
//!         ├── Mailbox<…>        events, agent reports, outbound signals
//!         └── ClusterBackend    reset ConfigMap, PodGroup annotations
//! ```

pub mod backend;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod fault;
pub mod machine;
pub mod proto;
pub mod service;
pub mod strategy;

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! npu-sched – topology-aware placement of multi-node NPU training jobs
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/         – YAML cluster snapshot, scheduler tuning, job specs
//! ├── job             – job input, validated block parameters, placement output
//! ├── topology        – superpod / rack / UB-memory view of the free nodes
//! └── scheduler/      – validation, placement strategies, in-place repair
//! ```

pub mod config;
pub mod job;
pub mod scheduler;
pub mod topology;

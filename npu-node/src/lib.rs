/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node-side NPU health helpers.
//!
//! ```text
//! lib.rs
//! ├── annotation/  – NPU topology / network-unhealthy annotation parsing
//! └── dpu/         – DPU operstate gating of NPU cards
//! ```
//!
//! Both modules are pure: the caller supplies annotation strings and
//! interface operstates, so the same code runs inside the scheduler (which
//! only sees node annotations) and on the node itself (which reads sysfs).

pub mod annotation;
pub mod dpu;

pub use annotation::{parse_card_list, usable_cards, AnnotationError, NPU_NAME_PREFIX};
pub use dpu::{BusType, DpuConfig, DpuFilter, OperState};

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cluster snapshot and job specification loading.
//!
//! The expected cluster YAML structure is:
//! ```yaml
//! scheduler:              # optional, every field defaulted
//!   max_node_npu_num: 16
//!   rack_node_num: 8
//!   first_reschedule_stage: 1
//! nodes:
//!   work0:
//!     super_pod_id: 0
//!     rack_id: 0
//!     ub_mem_id: 1
//!   work1:
//!     super_pod_id: 0
//!     rack_id: 0
//!     npu_annotation: "Ascend910-0,Ascend910-1"
//!     network_unhealthy: "Ascend910-1"
//!     allocated: true
//! ```
//!
//! A job spec looks like:
//! ```yaml
//! name: llm-train
//! sp_block: 64
//! tp_block: 32
//! tasks: 8
//! soft_super_pod: false
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use npu_node::{usable_cards, NPU_NAME_PREFIX};

use crate::job::JobInfo;
use crate::topology::NodeBaseInfo;

// ── SchedulerConfig ───────────────────────────────────────────────────────────

/// Cluster-wide shape parameters the placement pipeline depends on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// NPUs on one fully healthy node.
    pub max_node_npu_num: u32,
    /// Nodes in one rack.
    pub rack_node_num: u32,
    /// Up to this many pending recovery sessions, repairs may reuse spares
    /// from the faulted node's own rack.
    pub first_reschedule_stage: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_node_npu_num: 16,
            rack_node_num: 8,
            first_reschedule_stage: 1,
        }
    }
}

impl SchedulerConfig {
    /// NPUs in one rack, the upper bound for a tp-block.  Saturates at
    /// `u32::MAX`; [`SchedulerConfig::check`] rejects such shapes on load.
    pub fn rack_npu_num(&self) -> u32 {
        self.max_node_npu_num
            .checked_mul(self.rack_node_num)
            .unwrap_or(u32::MAX)
    }

    /// Rejects cluster shapes the placement pipeline cannot divide by.
    ///
    /// # Errors
    /// Returns an error if either count is zero or if their product does
    /// not fit in a `u32`.
    pub fn check(&self) -> Result<()> {
        if self.max_node_npu_num == 0 {
            bail!("scheduler.max_node_npu_num must be positive");
        }
        if self.rack_node_num == 0 {
            bail!("scheduler.rack_node_num must be positive");
        }
        if self.max_node_npu_num.checked_mul(self.rack_node_num).is_none() {
            bail!(
                "scheduler.max_node_npu_num({}) * rack_node_num({}) overflows",
                self.max_node_npu_num,
                self.rack_node_num
            );
        }
        Ok(())
    }
}

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClusterFile {
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    nodes: BTreeMap<String, NodeEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    super_pod_id: i32,
    rack_id: i32,
    ub_mem_id: Option<i32>,
    npu_annotation: Option<String>,
    #[serde(default)]
    network_unhealthy: String,
    #[serde(default)]
    allocated: bool,
}

// ── Public data structures ────────────────────────────────────────────────────

/// One cluster node as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub name: String,
    pub super_pod_id: i32,
    pub rack_id: i32,
    pub ub_mem_id: Option<i32>,
    /// NPU topology annotation; `None` means the node reports a full set.
    pub npu_annotation: Option<String>,
    /// Network-unhealthy NPU annotation, same format as `npu_annotation`.
    pub network_unhealthy: String,
    /// Already bound to another job.
    pub allocated: bool,
}

impl ClusterNode {
    pub fn base_info(&self) -> NodeBaseInfo {
        NodeBaseInfo {
            name: self.name.clone(),
            super_pod_id: self.super_pod_id,
            rack_id: self.rack_id,
            ub_mem_id: self.ub_mem_id,
        }
    }

    /// NPUs left after removing network-unhealthy cards.
    ///
    /// Returns `None` when the node carries no topology annotation.  A
    /// malformed annotation counts as zero usable NPUs.
    pub fn usable_npu_num(&self) -> Option<usize> {
        let topology = self.npu_annotation.as_deref()?;
        match usable_cards(topology, &self.network_unhealthy) {
            Ok(cards) => Some(cards.len()),
            Err(e) => {
                warn!(node = %self.name, error = %e, "malformed NPU annotation");
                Some(0)
            }
        }
    }

    /// `true` when the node has every NPU a full-node task needs.
    pub fn has_full_npus(&self, max_node_npu_num: u32) -> bool {
        self.usable_npu_num()
            .map_or(true, |n| n >= max_node_npu_num as usize)
    }
}

// ── ClusterConfigManager ──────────────────────────────────────────────────────

/// Loads and serves a cluster snapshot from a YAML file.
#[derive(Debug, Default)]
pub struct ClusterConfigManager {
    nodes: BTreeMap<String, ClusterNode>,
    scheduler: SchedulerConfig,
    loaded: bool,
}

impl ClusterConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager from nodes already in memory.
    pub fn from_nodes(scheduler: SchedulerConfig, nodes: impl IntoIterator<Item = ClusterNode>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            scheduler,
            loaded: true,
        }
    }

    /// Parses `path` and replaces any previously loaded snapshot.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, if the YAML is
    /// structurally invalid, or if the scheduler section fails
    /// [`SchedulerConfig::check`].
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading cluster snapshot from: {}", path.display());

        self.nodes.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open cluster file: {}", path.display()))?;

        let file: ClusterFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        file.scheduler
            .check()
            .with_context(|| format!("Invalid scheduler section in: {}", path.display()))?;

        for (name, entry) in file.nodes {
            debug!(
                "  Node: {} | superpod: {} | rack: {} | ubmem: {:?} | allocated: {}",
                name, entry.super_pod_id, entry.rack_id, entry.ub_mem_id, entry.allocated,
            );
            let node = ClusterNode {
                name: name.clone(),
                super_pod_id: entry.super_pod_id,
                rack_id: entry.rack_id,
                ub_mem_id: entry.ub_mem_id,
                npu_annotation: entry.npu_annotation,
                network_unhealthy: entry.network_unhealthy,
                allocated: entry.allocated,
            };
            self.nodes.insert(name, node);
        }

        if self.nodes.is_empty() {
            warn!("No nodes found in cluster file");
        }

        self.scheduler = file.scheduler;
        self.loaded = true;

        info!(
            nodes = self.nodes.len(),
            max_node_npu_num = self.scheduler.max_node_npu_num,
            rack_node_num = self.scheduler.rack_node_num,
            "Cluster snapshot loaded"
        );
        Ok(())
    }

    pub fn get_node(&self, name: &str) -> Option<&ClusterNode> {
        self.nodes.get(name)
    }

    pub fn get_all_nodes(&self) -> &BTreeMap<String, ClusterNode> {
        &self.nodes
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── JobSpec ───────────────────────────────────────────────────────────────────

/// A job as written by the user, in NPUs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub sp_block: i32,
    #[serde(default = "default_tp_block")]
    pub tp_block: i32,
    pub tasks: u32,
    /// NPUs per task; defaults to a full node.
    pub req_npu_num_per_task: Option<u32>,
    #[serde(default)]
    pub soft_super_pod: bool,
    #[serde(default)]
    pub ub_mem_affinity: bool,
}

fn default_tp_block() -> i32 {
    1
}

impl JobSpec {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open job file: {}", path.display()))?;
        let spec: JobSpec = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        debug!(job = %spec.name, sp_block = spec.sp_block, tp_block = spec.tp_block, tasks = spec.tasks, "job spec loaded");
        Ok(spec)
    }

    /// Expand into the scheduler's job view.
    pub fn to_job_info(&self, cfg: &SchedulerConfig) -> JobInfo {
        let per_task = self.req_npu_num_per_task.unwrap_or(cfg.max_node_npu_num);
        let mut job = JobInfo::full_node(
            self.name.clone(),
            self.sp_block,
            self.tp_block,
            self.tasks,
            per_task,
        );
        job.soft_super_pod = self.soft_super_pod;
        job.ub_mem_affinity = self.ub_mem_affinity;
        job
    }
}

/// Render a card list the way node annotations carry it.
pub fn npu_annotation(cards: impl IntoIterator<Item = u32>) -> String {
    cards
        .into_iter()
        .map(|c| format!("{NPU_NAME_PREFIX}{c}"))
        .collect::<Vec<_>>()
        .join(",")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

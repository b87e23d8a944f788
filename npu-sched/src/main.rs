/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use npu_sched::config::{ClusterConfigManager, JobSpec};
use npu_sched::scheduler::SuperPodScheduler;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Place one training job on a cluster snapshot and print the result.
///
/// Example:
///   npu-sched --cluster cluster.yaml --job job.yaml
#[derive(Debug, Parser)]
#[command(
    name = "npu-sched",
    about = "Topology-aware superpod placement for NPU training jobs",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML cluster snapshot.
    #[arg(short = 'c', long = "cluster")]
    cluster: PathBuf,

    /// Path to the YAML job specification.
    #[arg(short = 'j', long = "job")]
    job: PathBuf,

    /// Print the placement as YAML instead of a table.
    #[arg(long = "yaml", default_value_t = false)]
    yaml: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(cluster = ?cli.cluster, job = ?cli.job, "npu-sched starting");

    if let Err(e) = run(&cli) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut cluster = ClusterConfigManager::new();
    cluster.load_from_file(&cli.cluster)?;
    let spec = JobSpec::load_from_file(&cli.job)?;
    let job = spec.to_job_info(cluster.scheduler_config());

    let scheduler = SuperPodScheduler::new(Arc::new(cluster));
    let outcome = scheduler
        .schedule(&job)
        .with_context(|| format!("Failed to place job '{}'", job.name))?;

    if cli.yaml {
        let text = serde_yaml::to_string(&outcome.selected).context("Failed to render placement")?;
        print!("{text}");
        return Ok(());
    }

    println!("job {} placed by {} strategy", outcome.job, outcome.strategy);
    for (vid, nodes) in &outcome.selected {
        println!("  vpod {vid}:");
        for n in nodes {
            println!("    {:<16} superpod={} rack={}", n.name, n.super_pod_id, n.rack_id);
        }
    }
    if outcome.short_nodes > 0 {
        println!("  short by {} node(s)", outcome.short_nodes);
    }
    Ok(())
}

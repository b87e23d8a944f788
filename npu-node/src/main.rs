/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};

use npu_node::dpu::read_operstates;
use npu_node::{usable_cards, DpuConfig, DpuFilter};

/// Prints the NPU cards on this node that are usable for training.
///
/// Example:
///   npu-node --dpu-map /etc/npu/dpu.yaml \
///            --topology "Ascend910-0,Ascend910-1" --unhealthy "Ascend910-1"
#[derive(Debug, Parser)]
#[command(name = "npu-node", about = "Node-side NPU health filter", long_about = None)]
struct Cli {
    /// NPU topology annotation value.
    #[arg(short = 't', long = "topology")]
    topology: String,

    /// Network-unhealthy annotation value.
    #[arg(short = 'u', long = "unhealthy", default_value = "")]
    unhealthy: String,

    /// YAML DPU map.  Without it no DPU gating is applied.
    #[arg(short = 'm', long = "dpu-map")]
    dpu_map: Option<PathBuf>,

    /// Directory holding `<iface>/operstate` files.
    #[arg(long = "sysfs-root", default_value = "/sys/class/net")]
    sysfs_root: PathBuf,
}

fn run(cli: &Cli) -> anyhow::Result<Vec<u32>> {
    let mut cards = usable_cards(&cli.topology, &cli.unhealthy)?;
    info!(cards = ?cards, "cards after annotation filter");

    if let Some(path) = &cli.dpu_map {
        let filter = DpuFilter::from_config(DpuConfig::load_from_file(path)?);
        let states = read_operstates(&cli.sysfs_root, filter.interfaces());
        cards = filter.filter(&cards, &states);
        info!(cards = ?cards, "cards after DPU filter");
    }

    Ok(cards)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(cards) => {
            let list: Vec<String> = cards.iter().map(u32::to_string).collect();
            println!("{}", list.join(","));
        }
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

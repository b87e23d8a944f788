/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! DPU-gated NPU filtering.
//!
//! Every NPU reaches the parameter plane through one or more DPUs.  When all
//! DPUs behind a card are down the card is unusable for training even though
//! the NPU itself is healthy, so the node reports it as unavailable.
//!
//! The DPU map file looks like:
//! ```yaml
//! bus_type: pcie          # or "ub"
//! npus_per_position: 1    # optional; defaults to 1 for pcie, 2 for ub
//! dpus:
//!   "0": [eth1]
//!   "1": [eth2]
//! ```
//!
//! * **PCIe** – position key is the card index; the single DPU must be `up`.
//! * **UB** – position key is `card / npus_per_position`; at least one DPU of
//!   the position must be `up`.
//!
//! Cards with no position entry are dropped.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

// ── Bus type ──────────────────────────────────────────────────────────────────

/// How NPUs are attached to their DPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    Pcie,
    Ub,
}

impl BusType {
    /// Cards sharing one DPU position when the map file does not say.
    pub fn default_npus_per_position(self) -> u32 {
        match self {
            BusType::Pcie => 1,
            BusType::Ub => 2,
        }
    }
}

impl FromStr for BusType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pcie" => Ok(BusType::Pcie),
            "ub" => Ok(BusType::Ub),
            other => anyhow::bail!("unknown bus type '{other}' (valid: pcie, ub)"),
        }
    }
}

// ── Operstate ─────────────────────────────────────────────────────────────────

/// Link state of a network interface as reported by
/// `/sys/class/net/<iface>/operstate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
    /// Anything else, including a missing interface.
    Unknown,
}

impl OperState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "up" => OperState::Up,
            "down" => OperState::Down,
            _ => OperState::Unknown,
        }
    }

    pub fn is_up(self) -> bool {
        self == OperState::Up
    }
}

/// Read the operstate of every interface in `ifaces` below `sysfs_root`
/// (normally `/sys/class/net`).  Unreadable interfaces map to
/// [`OperState::Unknown`].
pub fn read_operstates<'a>(
    sysfs_root: &Path,
    ifaces: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, OperState> {
    let mut states = BTreeMap::new();
    for iface in ifaces {
        let path = sysfs_root.join(iface).join("operstate");
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => OperState::parse(&raw),
            Err(e) => {
                warn!(iface = %iface, path = %path.display(), error = %e, "cannot read operstate");
                OperState::Unknown
            }
        };
        states.insert(iface.to_string(), state);
    }
    states
}

// ── Config file ───────────────────────────────────────────────────────────────

/// DPU map as it appears in the YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct DpuConfig {
    pub bus_type: BusType,
    #[serde(default)]
    pub npus_per_position: Option<u32>,
    #[serde(default)]
    pub dpus: BTreeMap<String, Vec<String>>,
}

impl DpuConfig {
    /// Parse a DPU map file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open DPU map file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Drops NPU cards whose DPUs are down.
#[derive(Debug, Clone)]
pub struct DpuFilter {
    bus_type: BusType,
    npus_per_position: u32,
    dpus: BTreeMap<String, Vec<String>>,
}

impl DpuFilter {
    pub fn new(bus_type: BusType, dpus: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            bus_type,
            npus_per_position: bus_type.default_npus_per_position(),
            dpus,
        }
    }

    pub fn from_config(cfg: DpuConfig) -> Self {
        let mut filter = Self::new(cfg.bus_type, cfg.dpus);
        if let Some(n) = cfg.npus_per_position.filter(|n| *n > 0) {
            filter.npus_per_position = n;
        }
        filter
    }

    pub fn with_npus_per_position(mut self, n: u32) -> Self {
        self.npus_per_position = n.max(1);
        self
    }

    /// Every interface name referenced by the map.
    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.dpus.values().flatten().map(String::as_str)
    }

    fn position_of(&self, card: u32) -> String {
        match self.bus_type {
            BusType::Pcie => card.to_string(),
            BusType::Ub => (card / self.npus_per_position).to_string(),
        }
    }

    /// Keep the cards whose DPU position is reachable.
    pub fn filter(&self, cards: &[u32], operstates: &BTreeMap<String, OperState>) -> Vec<u32> {
        let is_up = |iface: &String| operstates.get(iface).is_some_and(|s| s.is_up());

        cards
            .iter()
            .copied()
            .filter(|&card| {
                let position = self.position_of(card);
                let Some(ifaces) = self.dpus.get(&position) else {
                    debug!(card, position = %position, "no DPU mapped, dropping card");
                    return false;
                };
                let keep = match self.bus_type {
                    BusType::Pcie => ifaces.first().is_some_and(is_up),
                    BusType::Ub => ifaces.iter().any(is_up),
                };
                if !keep {
                    debug!(card, dpus = ?ifaces, "DPU down, dropping card");
                }
                keep
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dpu_map(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn states(entries: &[(&str, &str)]) -> BTreeMap<String, OperState> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), OperState::parse(v)))
            .collect()
    }

    #[test]
    fn pcie_keeps_only_cards_with_up_dpu() {
        let filter = DpuFilter::new(
            BusType::Pcie,
            dpu_map(&[("0", &["eth1"]), ("1", &["eth2"]), ("2", &["eth3"]), ("3", &["eth4"])]),
        );
        let ops = states(&[("eth1", "up"), ("eth2", "up"), ("eth3", "down"), ("eth4", "down")]);

        let kept = filter.filter(&[0, 1, 2, 3, 4, 5, 6, 7], &ops);
        assert_eq!(kept, vec![0, 1]);
    }

    #[test]
    fn ub_keeps_card_when_one_of_two_dpus_is_up() {
        let filter = DpuFilter::new(BusType::Ub, dpu_map(&[("0", &["eth1", "eth2"])]));
        let ops = states(&[("eth1", "down"), ("eth2", "up")]);

        assert_eq!(filter.filter(&[0, 1], &ops), vec![0, 1]);
    }

    #[test]
    fn ub_drops_card_when_all_dpus_are_down() {
        let filter = DpuFilter::new(BusType::Ub, dpu_map(&[("0", &["eth1", "eth2"])]));
        let ops = states(&[("eth1", "down"), ("eth2", "down")]);

        assert!(filter.filter(&[0, 1], &ops).is_empty());
    }

    #[test]
    fn unknown_interface_counts_as_down() {
        let filter = DpuFilter::new(BusType::Pcie, dpu_map(&[("0", &["eth9"])]));
        assert!(filter.filter(&[0], &BTreeMap::new()).is_empty());
    }

    #[test]
    fn operstate_parse_trims_newline() {
        assert_eq!(OperState::parse("up\n"), OperState::Up);
        assert_eq!(OperState::parse("lowerlayerdown"), OperState::Unknown);
    }

    #[test]
    fn read_operstates_from_fake_sysfs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("eth1")).unwrap();
        std::fs::write(root.path().join("eth1/operstate"), "up\n").unwrap();

        let ops = read_operstates(root.path(), ["eth1", "eth2"]);
        assert_eq!(ops["eth1"], OperState::Up);
        assert_eq!(ops["eth2"], OperState::Unknown);
    }

    #[test]
    fn config_file_overrides_npus_per_position() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"bus_type: ub\nnpus_per_position: 4\ndpus:\n  \"0\": [eth1]\n")
            .unwrap();

        let cfg = DpuConfig::load_from_file(f.path()).unwrap();
        let filter = DpuFilter::from_config(cfg);
        let ops = states(&[("eth1", "up")]);
        assert_eq!(filter.filter(&[0, 3, 4], &ops), vec![0, 3]);
    }

    #[test]
    fn bus_type_from_str() {
        assert_eq!("PCIe".parse::<BusType>().unwrap(), BusType::Pcie);
        assert!("nvlink".parse::<BusType>().is_err());
    }
}

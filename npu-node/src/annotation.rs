/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! NPU annotation parsing.
//!
//! The device plugin publishes two annotations per node, both in the same
//! format – a comma separated list of device names sharing a fixed prefix:
//!
//! ```text
//! huawei.com/Ascend910:                  "Ascend910-0,Ascend910-1,Ascend910-2"
//! huawei.com/Ascend910-NetworkUnhealthy: "Ascend910-1"
//! ```
//!
//! The scheduler only cares about the card indices, so everything here
//! reduces to sorted, deduplicated `Vec<u32>`s.

use std::collections::BTreeSet;

use thiserror::Error;

/// Device-name prefix used by the Ascend device plugin.
pub const NPU_NAME_PREFIX: &str = "Ascend910-";

/// Why an annotation string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnnotationError {
    /// An entry did not start with the expected device prefix.
    #[error("device '{entry}' does not start with prefix '{prefix}'")]
    MissingPrefix { entry: String, prefix: String },

    /// The part after the prefix is not a card index.
    #[error("device '{entry}' has an invalid card index")]
    InvalidIndex { entry: String },
}

/// Parse a comma separated device list into sorted card indices.
///
/// Empty entries (e.g. a trailing comma or an empty annotation) are ignored.
pub fn parse_card_list(annotation: &str, prefix: &str) -> Result<Vec<u32>, AnnotationError> {
    let mut cards = BTreeSet::new();

    for raw in annotation.split(',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        let index = entry
            .strip_prefix(prefix)
            .ok_or_else(|| AnnotationError::MissingPrefix {
                entry: entry.to_string(),
                prefix: prefix.to_string(),
            })?;
        let card: u32 = index.parse().map_err(|_| AnnotationError::InvalidIndex {
            entry: entry.to_string(),
        })?;
        cards.insert(card);
    }

    Ok(cards.into_iter().collect())
}

/// Cards that are present in the topology annotation and not reported as
/// network-unhealthy.
pub fn usable_cards(topology: &str, network_unhealthy: &str) -> Result<Vec<u32>, AnnotationError> {
    let all = parse_card_list(topology, NPU_NAME_PREFIX)?;
    let bad: BTreeSet<u32> = parse_card_list(network_unhealthy, NPU_NAME_PREFIX)?
        .into_iter()
        .collect();
    Ok(all.into_iter().filter(|c| !bad.contains(c)).collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Group-wise normalization of raw setting totals into outcome frequencies.

use crate::error::{AppResult, DaqError};
use crate::experiment::SettingGroup;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Normalized outcome frequencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrequencyTable {
    /// Setting label → frequency within its group
    pub frequencies: BTreeMap<String, f64>,
    /// Settings that recorded zero counts inside a nonzero group
    pub zero_outcomes: Vec<String>,
}

impl FrequencyTable {
    /// Frequency of `label`, 0 when absent.
    pub fn get(&self, label: &str) -> f64 {
        self.frequencies.get(label).copied().unwrap_or(0.0)
    }

    /// Whether any outcome recorded zero counts.
    pub fn has_zero_outcomes(&self) -> bool {
        !self.zero_outcomes.is_empty()
    }
}

/// Divide every setting total by the sum of its group.
///
/// Settings missing from `totals` count as zero. A group whose sum is zero
/// ends the analysis with [`DaqError::ZeroGroupTotal`]; a single zero member
/// is only logged.
pub fn normalize(totals: &BTreeMap<String, f64>, groups: &[SettingGroup]) -> AppResult<FrequencyTable> {
    let mut table = FrequencyTable::default();

    for group in groups {
        let raw: Vec<(&str, f64)> = group
            .members
            .iter()
            .map(|m| (m.label(), totals.get(m.label()).copied().unwrap_or(0.0)))
            .collect();
        let sum: f64 = raw.iter().map(|(_, v)| v).sum();
        if sum <= 0.0 {
            return Err(DaqError::ZeroGroupTotal {
                group: group.name.clone(),
            });
        }

        for (label, value) in raw {
            if value == 0.0 {
                warn!(setting = label, group = %group.name, "Outcome recorded zero counts");
                table.zero_outcomes.push(label.to_string());
            }
            table.frequencies.insert(label.to_string(), value / sum);
        }
    }
    Ok(table)
}

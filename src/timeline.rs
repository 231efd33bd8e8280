//! Canonical fiscal-year labels (`N`, `N-1`, …) for a multi-document run.

use log::debug;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Position in the merged timeline, counted back from the most recent year.
///
/// Ordering follows the offset, so `N` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearLabel(u32);

impl YearLabel {
    pub const N: YearLabel = YearLabel(0);

    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub const fn offset(self) -> u32 {
        self.0
    }

    /// Lower-cased, hyphen-stripped form used as a ratio key suffix (`n`, `n1`, …).
    pub fn suffix(self) -> String {
        if self.0 == 0 {
            "n".to_string()
        } else {
            format!("n{}", self.0)
        }
    }
}

impl fmt::Display for YearLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            f.write_str("N")
        } else {
            write!(f, "N-{}", self.0)
        }
    }
}

impl FromStr for YearLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("n") {
            return Ok(Self::N);
        }
        let offset = trimmed
            .strip_prefix("N-")
            .or_else(|| trimmed.strip_prefix("n-"))
            .ok_or_else(|| format!("invalid year label '{}'", s))?;
        offset
            .parse::<u32>()
            .map(YearLabel)
            .map_err(|_| format!("invalid year label '{}'", s))
    }
}

impl Serialize for YearLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for YearLabel {
    fn schema_name() -> String {
        "YearLabel".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

/// A label that was reassigned because two documents' blocks covered the same year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabelReassignment {
    pub fiscal_year: i32,
    pub previous: YearLabel,
    pub current: YearLabel,
}

/// Absolute fiscal year → timeline label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FiscalYearMapping {
    labels: BTreeMap<i32, YearLabel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    reassignments: Vec<LabelReassignment>,
}

impl FiscalYearMapping {
    /// Builds the mapping for the fiscal years contributed by a run's documents.
    ///
    /// Consecutive years form one continuous timeline that reaches one year
    /// past the oldest filing (its `N-1` column). Otherwise every filing gets
    /// its own `N-k`/`N-(k+1)` block in descending order; when blocks overlap
    /// on an absolute year the later (older) block's label wins and the
    /// change is recorded in [`reassignments`](Self::reassignments).
    pub fn build(fiscal_years: &BTreeSet<i32>) -> Self {
        let mut mapping = Self::default();
        let Some(&most_recent) = fiscal_years.iter().next_back() else {
            return mapping;
        };

        let descending: Vec<i32> = fiscal_years.iter().rev().copied().collect();
        let consecutive = descending
            .windows(2)
            .all(|pair| pair[0].checked_sub(pair[1]) == Some(1));

        debug!(
            "Fiscal years {:?}, consecutive: {}",
            descending, consecutive
        );

        if consecutive {
            for offset in 0..=descending.len() as u32 {
                let Some(year) = i32::try_from(offset)
                    .ok()
                    .and_then(|delta| most_recent.checked_sub(delta))
                else {
                    break;
                };
                mapping.assign(year, YearLabel(offset));
            }
        } else {
            let mut offset = 0u32;
            for year in descending {
                mapping.assign(year, YearLabel(offset));
                if let Some(previous) = year.checked_sub(1) {
                    mapping.assign(previous, YearLabel(offset + 1));
                }
                offset = offset.saturating_add(2);
            }
        }

        debug!("Year mapping: {}", mapping);
        mapping
    }

    fn assign(&mut self, year: i32, label: YearLabel) {
        if let Some(previous) = self.labels.insert(year, label) {
            if previous != label {
                debug!(
                    "Fiscal year {} relabelled from {} to {}",
                    year, previous, label
                );
                self.reassignments.push(LabelReassignment {
                    fiscal_year: year,
                    previous,
                    current: label,
                });
            }
        }
    }

    pub fn label_for(&self, fiscal_year: i32) -> Option<YearLabel> {
        self.labels.get(&fiscal_year).copied()
    }

    pub fn contains(&self, fiscal_year: i32) -> bool {
        self.labels.contains_key(&fiscal_year)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, YearLabel)> + '_ {
        self.labels.iter().map(|(year, label)| (*year, *label))
    }

    pub fn reassignments(&self) -> &[LabelReassignment] {
        &self.reassignments
    }

    pub fn as_map(&self) -> &BTreeMap<i32, YearLabel> {
        &self.labels
    }
}

impl fmt::Display for FiscalYearMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .labels
            .iter()
            .rev()
            .map(|(year, label)| format!("{}: {}", year, label))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

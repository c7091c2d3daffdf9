//! Job counts by state.

use std::collections::BTreeMap;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use super::job::JobStatus;

/// State name -> number of jobs in that state.
///
/// Keys are kept as strings so counters from an engine that reports extra
/// states still add up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthCounters(BTreeMap<String, u64>);

impl HealthCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known [`JobStatus`] present with a count of zero.
    pub fn zeroed() -> Self {
        JobStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect()
    }

    pub fn get(&self, state: &str) -> u64 {
        self.0.get(state).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, status: JobStatus) {
        *self.0.entry(status.as_str().to_string()).or_insert(0) += 1;
    }

    /// Add `other` into `self`, key by key.
    pub fn merge(&mut self, other: &HealthCounters) {
        for (state, count) in &other.0 {
            let slot = self.0.entry(state.clone()).or_insert(0);
            *slot = slot.saturating_add(*count);
        }
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, u64)> for HealthCounters {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Add for HealthCounters {
    type Output = HealthCounters;

    fn add(mut self, rhs: HealthCounters) -> Self::Output {
        self.merge(&rhs);
        self
    }
}

impl std::iter::Sum for HealthCounters {
    fn sum<I: Iterator<Item = HealthCounters>>(iter: I) -> Self {
        iter.fold(HealthCounters::new(), Add::add)
    }
}

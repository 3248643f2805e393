//! Static provider trust ordering.

use std::collections::HashMap;

use crate::provider::ProviderKind;

/// Rank assigned to providers missing from the table.
pub const UNKNOWN_PROVIDER_PRIORITY: u32 = 999;

/// Provider name → priority rank (lower is more trusted).
///
/// Names are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    ranks: HashMap<String, u32>,
}

impl PriorityTable {
    /// An empty table; every provider ranks [`UNKNOWN_PROVIDER_PRIORITY`].
    pub fn empty() -> Self {
        Self {
            ranks: HashMap::new(),
        }
    }

    /// Set or replace the rank for a provider.
    pub fn with_rank(mut self, provider: &str, rank: u32) -> Self {
        self.set_rank(provider, rank);
        self
    }

    pub fn set_rank(&mut self, provider: &str, rank: u32) {
        self.ranks.insert(provider.to_lowercase(), rank);
    }

    /// Rank for a provider, falling back to [`UNKNOWN_PROVIDER_PRIORITY`].
    pub fn rank(&self, provider: &str) -> u32 {
        self.ranks
            .get(&provider.to_lowercase())
            .copied()
            .unwrap_or(UNKNOWN_PROVIDER_PRIORITY)
    }

    /// Entries sorted by rank, then name.
    pub fn entries(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<_> = self
            .ranks
            .iter()
            .map(|(name, rank)| (name.clone(), *rank))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

impl Default for PriorityTable {
    /// Built-in ranks for every known provider.
    fn default() -> Self {
        let mut table = Self::empty();
        for kind in ProviderKind::ALL {
            table.set_rank(kind.name(), kind.default_priority());
        }
        table
    }
}

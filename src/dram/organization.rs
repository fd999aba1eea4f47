//! DRAM hierarchy organization and bank index arithmetic.
//!
//! The organization is an ordered list of (level name, count) pairs,
//! e.g. `channel, rank, bankgroup, bank, row, column`. All levels above
//! `row` address an independent bank array; their coordinates project to
//! a flat bank index in `[0, num_banks)` via mixed-radix encoding with
//! the channel as the least significant digit.

use serde::{Deserialize, Serialize};

use crate::dram::address::{AddressVector, BankId, UNSET};

/// One hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DramLevel {
    pub name: String,
    pub count: usize,
}

/// An ordered DRAM hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DramOrganization {
    levels: Vec<DramLevel>,
}

impl DramOrganization {
    /// Build an organization from `(name, count)` pairs, ordered from the
    /// outermost level (channel) to the innermost (column).
    pub fn new<S: Into<String>>(levels: Vec<(S, usize)>) -> Self {
        Self {
            levels: levels
                .into_iter()
                .map(|(name, count)| DramLevel {
                    name: name.into(),
                    count,
                })
                .collect(),
        }
    }

    /// The standard six-level hierarchy with a single rank.
    pub fn standard(
        channels: usize,
        ranks: usize,
        bankgroups: usize,
        banks: usize,
        rows: usize,
        columns: usize,
    ) -> Self {
        Self::new(vec![
            ("channel", channels),
            ("rank", ranks),
            ("bankgroup", bankgroups),
            ("bank", banks),
            ("row", rows),
            ("column", columns),
        ])
    }

    /// All levels in order.
    pub fn levels(&self) -> &[DramLevel] {
        &self.levels
    }

    /// Index of a level by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.levels.iter().position(|l| l.name == name)
    }

    /// Count of a level by name.
    pub fn level_size(&self, name: &str) -> Option<usize> {
        self.levels.iter().find(|l| l.name == name).map(|l| l.count)
    }

    /// Number of bank-bearing levels (everything above `row`; the whole
    /// hierarchy if there is no row level).
    fn bank_level_count(&self) -> usize {
        self.index_of("row").unwrap_or(self.levels.len())
    }

    /// Total number of independently addressable banks.
    pub fn num_banks(&self) -> usize {
        self.levels[..self.bank_level_count()]
            .iter()
            .map(|l| l.count)
            .product()
    }

    /// Project an address onto its flat bank index.
    ///
    /// Returns `None` when any bank-bearing coordinate is unset or out of
    /// range; callers skip such operations rather than abort.
    pub fn project(&self, addr: &AddressVector) -> Option<BankId> {
        let mut bank = 0usize;
        let mut stride = 1usize;
        for (j, level) in self.levels[..self.bank_level_count()].iter().enumerate() {
            let coord = addr.get(j)?;
            if coord < 0 || coord as usize >= level.count {
                return None;
            }
            bank += coord as usize * stride;
            stride *= level.count;
        }
        Some(bank)
    }

    /// Reverse the mixed-radix encoding of a flat bank index.
    ///
    /// Level `j` receives `bank % count[j]`, then `bank /= count[j]`.
    /// Row and column are left unset for the caller to bind.
    pub fn decompose(&self, bank: BankId) -> AddressVector {
        let mut addr = AddressVector::unset(self.levels.len());
        let mut rest = bank;
        for (j, level) in self.levels[..self.bank_level_count()].iter().enumerate() {
            addr.set(j, (rest % level.count) as i64);
            rest /= level.count;
        }
        addr
    }

    /// Build a fully bound address for `(bank, row, column)`.
    pub fn compose(&self, bank: BankId, row: i64, column: i64) -> AddressVector {
        let mut addr = self.decompose(bank);
        if let Some(row_idx) = self.index_of("row") {
            addr.set(row_idx, row);
        }
        if let Some(col_idx) = self.index_of("column") {
            addr.set(col_idx, column);
        }
        addr
    }

    /// Whether an address has every level bound.
    pub fn is_complete(&self, addr: &AddressVector) -> bool {
        addr.len() == self.levels.len() && addr.0.iter().all(|&c| c != UNSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> DramOrganization {
        // 2 channels x 1 rank x 4 bankgroups x 4 banks = 32 banks.
        DramOrganization::standard(2, 1, 4, 4, 16384, 1024)
    }

    #[test]
    fn test_num_banks() {
        assert_eq!(org().num_banks(), 32);
        assert_eq!(org().level_size("bankgroup"), Some(4));
        assert_eq!(org().level_size("subarray"), None);
    }

    #[test]
    fn test_project_decompose_roundtrip() {
        let org = org();
        for bank in 0..org.num_banks() {
            let addr = org.decompose(bank);
            assert_eq!(org.project(&addr), Some(bank), "bank {bank}");
        }
    }

    #[test]
    fn test_project_rejects_incomplete() {
        let org = org();
        let mut addr = AddressVector::unset(6);
        assert_eq!(org.project(&addr), None);

        // Bound but out of range.
        addr.set(0, 9);
        addr.set(1, 0);
        addr.set(2, 0);
        addr.set(3, 0);
        assert_eq!(org.project(&addr), None);
    }

    #[test]
    fn test_compose_binds_row_column() {
        let org = org();
        let addr = org.compose(5, 12, 0);
        assert!(org.is_complete(&addr));
        assert_eq!(addr.get(org.index_of("row").unwrap()), Some(12));
        assert_eq!(org.project(&addr), Some(5));
    }

    #[test]
    fn test_channel_is_least_significant() {
        let org = org();
        // Bank 1 differs from bank 0 only in the channel digit.
        let addr = org.decompose(1);
        assert_eq!(addr.get(0), Some(1));
        assert_eq!(addr.get(2), Some(0));
    }
}

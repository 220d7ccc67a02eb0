// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Epoch-keyed strategy tables.
//!
//! Protocol upgrades change gas prices and supply accounting at fixed heights. Each such
//! parameter is stored as an [`EpochTable`]: a list of entries sorted by activation epoch whose
//! ranges tile the whole epoch axis starting at genesis.

use fvm_shared::clock::ChainEpoch;
use thiserror::Error;

pub const EPOCH_DURATION_SECONDS: i64 = 30;
pub const EPOCHS_IN_DAY: ChainEpoch = 24 * 60 * 60 / EPOCH_DURATION_SECONDS;
pub const EPOCHS_IN_YEAR: ChainEpoch = 365 * EPOCHS_IN_DAY;

/// Mainnet upgrade heights that change interpreter behaviour.
pub const UPGRADE_IGNITION_HEIGHT: ChainEpoch = 94000;
pub const UPGRADE_ACTORS_V2_HEIGHT: ChainEpoch = 138720;
pub const UPGRADE_LIFTOFF_HEIGHT: ChainEpoch = 148888;
pub const UPGRADE_CALICO_HEIGHT: ChainEpoch = 265200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EpochTableError {
    #[error("epoch table is empty")]
    Empty,
    #[error("first entry must activate at genesis, got epoch {0}")]
    NoGenesisEntry(ChainEpoch),
    #[error("activation epochs must be strictly increasing ({prev} then {next})")]
    Unordered { prev: ChainEpoch, next: ChainEpoch },
}

/// A total mapping from epochs to values, built from `(activation_epoch, value)` pairs.
#[derive(Clone, Debug)]
pub struct EpochTable<T> {
    entries: Vec<(ChainEpoch, T)>,
}

impl<T> EpochTable<T> {
    /// Build a table. The first entry must activate at epoch 0 and activation epochs must be
    /// strictly increasing, so that ranges are contiguous and never overlap.
    pub fn new(entries: Vec<(ChainEpoch, T)>) -> Result<Self, EpochTableError> {
        let first = entries.first().ok_or(EpochTableError::Empty)?.0;
        if first != 0 {
            return Err(EpochTableError::NoGenesisEntry(first));
        }
        for pair in entries.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(EpochTableError::Unordered {
                    prev: pair[0].0,
                    next: pair[1].0,
                });
            }
        }
        Ok(Self { entries })
    }

    /// Build a table from entries already known to be well formed.
    pub(crate) fn from_sorted(entries: Vec<(ChainEpoch, T)>) -> Self {
        debug_assert!(matches!(entries.first(), Some((0, _))));
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Self { entries }
    }

    /// A table with a single value in force for every epoch.
    pub fn constant(value: T) -> Self {
        Self {
            entries: vec![(0, value)],
        }
    }

    /// The value in force at `epoch`. Epochs before genesis get the genesis value.
    pub fn get(&self, epoch: ChainEpoch) -> &T {
        let idx = self
            .entries
            .partition_point(|(start, _)| *start <= epoch)
            .saturating_sub(1);
        &self.entries[idx].1
    }

    /// The epoch range `[start, end)` covered by the entry in force at `epoch`. The last range
    /// is open ended.
    pub fn range(&self, epoch: ChainEpoch) -> (ChainEpoch, Option<ChainEpoch>) {
        let idx = self
            .entries
            .partition_point(|(start, _)| *start <= epoch)
            .saturating_sub(1);
        (
            self.entries[idx].0,
            self.entries.get(idx + 1).map(|(start, _)| *start),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ChainEpoch, T)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    fn table() -> EpochTable<&'static str> {
        EpochTable::new(vec![(0, "genesis"), (100, "first"), (250, "second")]).unwrap()
    }

    #[test]
    fn lookup_at_boundaries() {
        let t = table();
        assert_eq!(*t.get(-5), "genesis");
        assert_eq!(*t.get(0), "genesis");
        assert_eq!(*t.get(99), "genesis");
        assert_eq!(*t.get(100), "first");
        assert_eq!(*t.get(249), "first");
        assert_eq!(*t.get(250), "second");
        assert_eq!(*t.get(ChainEpoch::MAX), "second");
        assert_eq!(t.range(120), (100, Some(250)));
        assert_eq!(t.range(300), (250, None));
    }

    #[test]
    fn rejects_malformed_tables() {
        assert_eq!(
            EpochTable::<()>::new(vec![]).unwrap_err(),
            EpochTableError::Empty
        );
        assert_eq!(
            EpochTable::new(vec![(10, ())]).unwrap_err(),
            EpochTableError::NoGenesisEntry(10)
        );
        assert_eq!(
            EpochTable::new(vec![(0, ()), (5, ()), (5, ())]).unwrap_err(),
            EpochTableError::Unordered { prev: 5, next: 5 }
        );
    }

    #[quickcheck]
    fn every_epoch_falls_in_exactly_one_range(epoch: i64) -> bool {
        let t = table();
        let (start, end) = t.range(epoch);
        let covering = t
            .iter()
            .zip(t.iter().skip(1).map(|(s, _)| Some(*s)).chain(Some(None)))
            .filter(|((s, _), e)| {
                let s = if *s == 0 { ChainEpoch::MIN } else { *s };
                s <= epoch && e.map_or(true, |e| epoch < e)
            })
            .count();
        covering == 1 && (epoch < 0 || start <= epoch) && end.map_or(true, |e| epoch < e)
    }
}

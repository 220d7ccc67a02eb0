// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Interfaces to the node embedding the interpreter.

use std::sync::Arc;

use cid::Cid;
use fvm_shared::clock::ChainEpoch;

use crate::rand::DomainSeparationTag;

/// Services the node provides to the machine.
pub trait Externs: Rand {}

/// Randomness provider trait
pub trait Rand {
    /// Gets 32 bytes of randomness for ChainRand paramaterized by the DomainSeparationTag,
    /// ChainEpoch, Entropy from the ticket chain.
    fn get_chain_randomness(
        &self,
        pers: DomainSeparationTag,
        round: ChainEpoch,
        entropy: &[u8],
    ) -> anyhow::Result<[u8; 32]>;

    /// Gets 32 bytes of randomness for ChainRand paramaterized by the DomainSeparationTag,
    /// ChainEpoch, Entropy from the latest beacon entry.
    fn get_beacon_randomness(
        &self,
        pers: DomainSeparationTag,
        round: ChainEpoch,
        entropy: &[u8],
    ) -> anyhow::Result<[u8; 32]>;
}

/// Read-only view of the chain the messages are executed on.
pub trait ChainView {
    /// The epoch of the tipset messages are currently being applied on top of.
    fn head_epoch(&self) -> ChainEpoch;

    /// The ticket digest of the tipset at `epoch`, or of the closest tipset before it when
    /// `epoch` was a null round.
    fn ticket(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Vec<u8>>>;

    /// The latest beacon entry at or before `epoch`.
    fn beacon(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Vec<u8>>>;

    /// The parent state root of the tipset at `epoch`.
    fn state_root(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Cid>>;
}

impl<V: ChainView + ?Sized> ChainView for Arc<V> {
    fn head_epoch(&self) -> ChainEpoch {
        (**self).head_epoch()
    }

    fn ticket(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Vec<u8>>> {
        (**self).ticket(epoch)
    }

    fn beacon(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Vec<u8>>> {
        (**self).beacon(epoch)
    }

    fn state_root(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Cid>> {
        (**self).state_root(epoch)
    }
}

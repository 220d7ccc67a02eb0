// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Domain-separated randomness drawn from the ticket chain and the beacon.

use std::io::Write;

use blake2b_simd::Params;
use byteorder::{BigEndian, WriteBytesExt};
use fvm_shared::clock::ChainEpoch;
use num_derive::FromPrimitive;
use thiserror::Error;

use crate::externs::{ChainView, Externs, Rand};

/// Specifies a domain for randomness generation.
#[derive(PartialEq, Eq, Copy, Clone, FromPrimitive, Debug, Hash)]
#[repr(i64)]
pub enum DomainSeparationTag {
    TicketProduction = 1,
    ElectionProofProduction = 2,
    WinningPoStChallengeSeed = 3,
    WindowedPoStChallengeSeed = 4,
    SealRandomness = 5,
    InteractiveSealChallengeSeed = 6,
    WindowedPoStDeadlineAssignment = 7,
    MarketDealCronSeed = 8,
    PoStChainCommit = 9,
}

#[derive(Debug, Error)]
pub enum RandomnessError {
    #[error("cannot draw randomness from before genesis (epoch {0})")]
    BeforeGenesis(ChainEpoch),
    #[error("cannot draw randomness from the future (epoch {requested}, head {head})")]
    FromFuture {
        requested: ChainEpoch,
        head: ChainEpoch,
    },
    #[error("no randomness source available for epoch {0}")]
    Unavailable(ChainEpoch),
    #[error("chain view failed: {0:#}")]
    Chain(#[from] anyhow::Error),
}

/// Computes a pseudo random 32 byte array.
pub fn draw_randomness(
    rbase: &[u8],
    pers: DomainSeparationTag,
    round: ChainEpoch,
    entropy: &[u8],
) -> [u8; 32] {
    let vrf_digest = blake2b_256(rbase);

    let mut state = Params::new().hash_length(32).to_state();
    // Writes into a hash state are infallible.
    let _ = state.write_i64::<BigEndian>(pers as i64);
    let _ = state.write_all(&vrf_digest);
    let _ = state.write_i64::<BigEndian>(round);
    let _ = state.write_all(entropy);

    let mut ret = [0u8; 32];
    ret.clone_from_slice(state.finalize().as_bytes());
    ret
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut ret = [0u8; 32];
    ret.clone_from_slice(
        Params::new()
            .hash_length(32)
            .to_state()
            .update(data)
            .finalize()
            .as_bytes(),
    );
    ret
}

/// Allows for deriving the randomness from a particular chain view.
#[derive(Clone, Debug)]
pub struct ChainRand<V> {
    view: V,
}

impl<V: ChainView> ChainRand<V> {
    pub fn new(view: V) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Randomness from the ticket of the tipset at (or before) `round`.
    pub fn chain_randomness(
        &self,
        pers: DomainSeparationTag,
        round: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; 32], RandomnessError> {
        self.check_round(round)?;
        let base = self
            .view
            .ticket(round)?
            .ok_or(RandomnessError::Unavailable(round))?;
        Ok(draw_randomness(&base, pers, round, entropy))
    }

    /// Randomness from the latest beacon entry at (or before) `round`.
    pub fn beacon_randomness(
        &self,
        pers: DomainSeparationTag,
        round: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; 32], RandomnessError> {
        self.check_round(round)?;
        let base = self
            .view
            .beacon(round)?
            .ok_or(RandomnessError::Unavailable(round))?;
        Ok(draw_randomness(&base, pers, round, entropy))
    }

    fn check_round(&self, round: ChainEpoch) -> Result<(), RandomnessError> {
        if round < 0 {
            return Err(RandomnessError::BeforeGenesis(round));
        }
        let head = self.view.head_epoch();
        if round > head {
            return Err(RandomnessError::FromFuture {
                requested: round,
                head,
            });
        }
        Ok(())
    }
}

impl<V: ChainView> Rand for ChainRand<V> {
    fn get_chain_randomness(
        &self,
        pers: DomainSeparationTag,
        round: ChainEpoch,
        entropy: &[u8],
    ) -> anyhow::Result<[u8; 32]> {
        Ok(self.chain_randomness(pers, round, entropy)?)
    }

    fn get_beacon_randomness(
        &self,
        pers: DomainSeparationTag,
        round: ChainEpoch,
        entropy: &[u8],
    ) -> anyhow::Result<[u8; 32]> {
        Ok(self.beacon_randomness(pers, round, entropy)?)
    }
}

impl<V: ChainView> Externs for ChainRand<V> {}

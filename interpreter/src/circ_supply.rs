// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Circulating supply: vested + mined + disbursed reserve, less burnt and locked funds.

use anyhow::{anyhow, Context};
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::CborStore;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use num_traits::Zero;

use crate::builtin::{reward, BURNT_FUNDS_ACTOR_ID, RESERVE_ACTOR_ID, REWARD_ACTOR_ID};
use crate::epochs::{
    EpochTable, EpochTableError, EPOCHS_IN_DAY, EPOCHS_IN_YEAR, UPGRADE_ACTORS_V2_HEIGHT,
    UPGRADE_CALICO_HEIGHT, UPGRADE_IGNITION_HEIGHT, UPGRADE_LIFTOFF_HEIGHT,
};
use crate::externs::ChainView;
use crate::state_tree::StateTree;

/// Initial balance of the mainnet reserve, in whole FIL.
pub const RESERVE_INITIAL_FIL: i64 = 300_000_000;

const PRE_CALICO_VESTING: [(ChainEpoch, i64); 5] = [
    (183 * EPOCHS_IN_DAY, 82_717_041),
    (EPOCHS_IN_YEAR, 22_421_712),
    (2 * EPOCHS_IN_YEAR, 7_223_364),
    (3 * EPOCHS_IN_YEAR, 87_637_883),
    (6 * EPOCHS_IN_YEAR, 400_000_000),
];

const CALICO_VESTING: [(ChainEpoch, i64); 6] = [
    (0, 10_632_000),
    (183 * EPOCHS_IN_DAY, 19_015_887 + 32_787_700),
    (EPOCHS_IN_YEAR, 22_421_712 + 9_400_000),
    (2 * EPOCHS_IN_YEAR, 7_223_364),
    (3 * EPOCHS_IN_YEAR, 87_637_883 + 898_958),
    (6 * EPOCHS_IN_YEAR, 100_000_000 + 300_000_000 + 9_805_053),
];

/// A genesis allocation that unlocks linearly over `duration` epochs from `start`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VestingTranche {
    pub start: ChainEpoch,
    pub duration: ChainEpoch,
    pub initial: TokenAmount,
}

impl VestingTranche {
    pub fn vested(&self, epoch: ChainEpoch) -> TokenAmount {
        &self.initial - v0_amount_locked(self.duration, &self.initial, epoch - self.start)
    }
}

/// An actor funded at genesis. Whatever it has spent of its initial balance counts as vested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenesisAccount {
    pub id: ActorID,
    pub initial: TokenAmount,
}

/// The supply accounting rules in force over a range of epochs.
#[derive(Clone, Debug, Default)]
pub struct SupplyEra {
    pub vesting: Vec<VestingTranche>,
    /// Whether funds paid out of the reserve count as circulating.
    pub count_reserve: bool,
    pub genesis_accounts: Vec<GenesisAccount>,
    /// Pledge and market collateral put up at genesis, counted as vested while this era lasts.
    pub genesis_locked: TokenAmount,
}

/// Computes the circulating supply for an epoch against a state tree.
#[derive(Clone, Debug)]
pub struct CircSupplyCalculator {
    eras: EpochTable<SupplyEra>,
    locked_actors: Vec<ActorID>,
    reserve_initial: TokenAmount,
}

impl CircSupplyCalculator {
    pub fn new(eras: Vec<(ChainEpoch, SupplyEra)>) -> Result<Self, EpochTableError> {
        Ok(Self {
            eras: EpochTable::new(eras)?,
            locked_actors: Vec::new(),
            reserve_initial: TokenAmount::from_whole(RESERVE_INITIAL_FIL),
        })
    }

    /// A calculator with no vesting and no reserve: supply is mined less burnt and locked.
    pub fn minted_only() -> Self {
        Self {
            eras: EpochTable::constant(SupplyEra::default()),
            locked_actors: Vec::new(),
            reserve_initial: TokenAmount::zero(),
        }
    }

    /// The mainnet schedule: genesis vesting until Ignition, the Liftoff-anchored schedule until
    /// Calico, and the Calico schedule after that. The reserve counts after the actors v2 upgrade.
    pub fn mainnet() -> Self {
        Self::mainnet_with_genesis(Vec::new(), TokenAmount::zero())
    }

    /// [`CircSupplyCalculator::mainnet`] with the funded accounts and the collateral locked in
    /// the genesis state. The collateral counts as vested until the actors v2 upgrade.
    pub fn mainnet_with_genesis(accounts: Vec<GenesisAccount>, locked: TokenAmount) -> Self {
        let genesis: Vec<_> = PRE_CALICO_VESTING
            .iter()
            .map(|&(duration, amount)| VestingTranche {
                start: 0,
                duration,
                // Genesis-era amounts were recorded in attoFIL.
                initial: TokenAmount::from_atto(amount),
            })
            .collect();
        let ignition = liftoff_schedule(&PRE_CALICO_VESTING);
        let calico = liftoff_schedule(&CALICO_VESTING);

        let era = |vesting: &Vec<VestingTranche>, count_reserve, genesis_locked: &TokenAmount| {
            SupplyEra {
                vesting: vesting.clone(),
                count_reserve,
                genesis_accounts: accounts.clone(),
                genesis_locked: genesis_locked.clone(),
            }
        };
        let none = TokenAmount::zero();
        let eras = vec![
            (0, era(&genesis, false, &locked)),
            (UPGRADE_IGNITION_HEIGHT + 1, era(&ignition, false, &locked)),
            // The upgrade epoch itself counts neither the genesis collateral nor the reserve.
            (UPGRADE_ACTORS_V2_HEIGHT, era(&ignition, false, &none)),
            (UPGRADE_ACTORS_V2_HEIGHT + 1, era(&ignition, true, &none)),
            (UPGRADE_CALICO_HEIGHT + 1, era(&calico, true, &none)),
        ];

        Self {
            eras: EpochTable::from_sorted(eras),
            locked_actors: Vec::new(),
            reserve_initial: TokenAmount::from_whole(RESERVE_INITIAL_FIL),
        }
    }

    /// Actors whose balances count as locked.
    pub fn with_locked_actors(mut self, actors: impl IntoIterator<Item = ActorID>) -> Self {
        self.locked_actors = actors.into_iter().collect();
        self
    }

    pub fn with_reserve_initial(mut self, amount: TokenAmount) -> Self {
        self.reserve_initial = amount;
        self
    }

    pub fn era(&self, epoch: ChainEpoch) -> &SupplyEra {
        self.eras.get(epoch)
    }

    /// Released by the vesting schedules alone.
    pub fn scheduled_vesting(&self, epoch: ChainEpoch) -> TokenAmount {
        self.era(epoch)
            .vesting
            .iter()
            .fold(TokenAmount::zero(), |acc, t| acc + t.vested(epoch))
    }

    /// Scheduled vesting, plus what genesis accounts have spent, plus any genesis collateral the
    /// era still counts.
    pub fn fil_vested<B: Blockstore>(
        &self,
        epoch: ChainEpoch,
        state_tree: &StateTree<B>,
    ) -> anyhow::Result<TokenAmount> {
        let era = self.era(epoch);
        let mut vested = self.scheduled_vesting(epoch) + &era.genesis_locked;
        for account in &era.genesis_accounts {
            let spent = &account.initial - actor_balance(state_tree, account.id)?;
            if spent.is_positive() {
                vested = vested + spent;
            }
        }
        Ok(vested)
    }

    /// Computes the circulating supply at `epoch`, never less than zero.
    pub fn circulating_supply<B: Blockstore>(
        &self,
        epoch: ChainEpoch,
        state_tree: &StateTree<B>,
    ) -> anyhow::Result<TokenAmount> {
        let era = self.era(epoch);

        let vested = self.fil_vested(epoch, state_tree)?;
        let mined = fil_mined(state_tree)?;
        let burnt = actor_balance(state_tree, BURNT_FUNDS_ACTOR_ID)?;
        let locked = self.fil_locked(state_tree)?;
        let reserve_disbursed = if era.count_reserve {
            // If money enters the reserve actor, this could lead to a negative term.
            &self.reserve_initial - actor_balance(state_tree, RESERVE_ACTOR_ID)?
        } else {
            TokenAmount::zero()
        };

        let circulating = vested + mined + reserve_disbursed - burnt - locked;
        if circulating.is_negative() {
            Ok(TokenAmount::zero())
        } else {
            Ok(circulating)
        }
    }

    fn fil_locked<B: Blockstore>(&self, state_tree: &StateTree<B>) -> anyhow::Result<TokenAmount> {
        self.locked_actors
            .iter()
            .try_fold(TokenAmount::zero(), |acc, &id| {
                Ok(acc + actor_balance(state_tree, id)?)
            })
    }
}

impl Default for CircSupplyCalculator {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Computes the circulating supply against the state the chain view reports for `epoch`.
pub fn circulating_supply_at<B, V>(
    calc: &CircSupplyCalculator,
    epoch: ChainEpoch,
    view: &V,
    store: B,
) -> anyhow::Result<TokenAmount>
where
    B: Blockstore,
    V: ChainView,
{
    let root = view
        .state_root(epoch)?
        .ok_or_else(|| anyhow!("no state root for epoch {}", epoch))?;
    let state_tree = StateTree::new_from_root(store, &root)?;
    calc.circulating_supply(epoch, &state_tree)
}

fn liftoff_schedule(table: &[(ChainEpoch, i64)]) -> Vec<VestingTranche> {
    table
        .iter()
        .map(|&(duration, amount)| VestingTranche {
            start: UPGRADE_LIFTOFF_HEIGHT,
            duration,
            initial: TokenAmount::from_whole(amount),
        })
        .collect()
}

fn actor_balance<B: Blockstore>(
    state_tree: &StateTree<B>,
    id: ActorID,
) -> anyhow::Result<TokenAmount> {
    Ok(state_tree
        .get_actor(id)?
        .with_context(|| format!("failed to get actor {}", id))?
        .balance)
}

fn fil_mined<B: Blockstore>(state_tree: &StateTree<B>) -> anyhow::Result<TokenAmount> {
    let actor = state_tree
        .get_actor(REWARD_ACTOR_ID)?
        .context("reward actor could not be resolved")?;
    let state: reward::State = state_tree
        .store()
        .get_cbor(&actor.state)?
        .context("reward actor state not found")?;
    Ok(state.total_mined)
}

/// Amount of a linear vesting tranche still locked at `elapsed` epochs in. The per-epoch unit is
/// floored before scaling back up; the rounding is consensus critical.
fn v0_amount_locked(
    unlock_duration: ChainEpoch,
    initial_balance: &TokenAmount,
    elapsed_epoch: ChainEpoch,
) -> TokenAmount {
    if elapsed_epoch >= unlock_duration {
        return TokenAmount::zero();
    }
    if elapsed_epoch < 0 {
        return initial_balance.clone();
    }
    let unit_locked = initial_balance.div_floor(unlock_duration);
    unit_locked * (unlock_duration - elapsed_epoch)
}

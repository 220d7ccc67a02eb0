// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use cid::Cid;
use derive_more::{Deref, DerefMut};
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use num_traits::Zero;

use crate::circ_supply::CircSupplyCalculator;
use crate::engine::Engine;
use crate::externs::Externs;
use crate::gas::{Gas, OverestimationPolicy, PriceList, PriceSchedules};
use crate::kernel::Result;
use crate::state_tree::StateTree;

mod default;

pub use default::DefaultMachine;

/// The maximum number of nested sends before a call is refused.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 1024;

/// The largest gas limit a single message may carry.
pub const DEFAULT_BLOCK_GAS_LIMIT: Gas = 10_000_000_000;

/// The [`Machine`] is the top-level object of the interpreter.
///
/// The lifecycle of a [`Machine`] is intended to span the execution of a tipset. It owns the
/// state tree, and the executor applies messages to it one at a time.
pub trait Machine: 'static {
    type Blockstore: Blockstore;
    type Externs: Externs;

    /// Returns the registry of actor code.
    fn engine(&self) -> &Engine;

    /// Returns a reference to the machine's blockstore.
    fn blockstore(&self) -> &Self::Blockstore;

    /// Returns a reference to the machine context: static information about the current epoch.
    fn context(&self) -> &MachineContext;

    /// Returns a reference to all "node" supplied APIs.
    fn externs(&self) -> &Self::Externs;

    /// Returns a reference to the state tree.
    fn state_tree(&self) -> &StateTree<Self::Blockstore>;

    /// Returns a mutable reference to the state tree.
    fn state_tree_mut(&mut self) -> &mut StateTree<Self::Blockstore>;

    /// Persist the state tree; returns the new state root.
    fn flush(&mut self) -> Result<Cid>;

    /// Move `value` between two existing actors. A missing or underfunded sender fails with
    /// `InsufficientFunds`, a missing recipient with `NotFound`.
    fn transfer(&mut self, from: ActorID, to: ActorID, value: &TokenAmount) -> Result<()>;

    /// Consumes the machine and returns the owned blockstore.
    fn into_store(self) -> Self::Blockstore;
}

/// Network-level settings. Applicable to all epochs.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// The network name, recorded in the init actor at genesis.
    pub network_name: String,

    /// The maximum call depth.
    ///
    /// DEFAULT: 1024
    pub max_call_depth: u32,

    /// The largest gas limit a message may carry.
    ///
    /// DEFAULT: 10B
    pub block_gas_limit: Gas,

    /// How unused gas is penalised.
    ///
    /// DEFAULT: 10% tolerance, full burn rate.
    pub overestimation: OverestimationPolicy,

    /// The gas price lists by epoch.
    pub price_schedules: PriceSchedules,

    /// How circulating supply is computed.
    pub supply: CircSupplyCalculator,
}

impl NetworkConfig {
    /// Create a new network config with mainnet defaults.
    pub fn new(network_name: impl Into<String>) -> Self {
        NetworkConfig {
            network_name: network_name.into(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            overestimation: OverestimationPolicy::FILECOIN,
            price_schedules: PriceSchedules::mainnet(),
            supply: CircSupplyCalculator::mainnet(),
        }
    }

    pub fn with_max_call_depth(&mut self, depth: u32) -> &mut Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_block_gas_limit(&mut self, limit: Gas) -> &mut Self {
        self.block_gas_limit = limit;
        self
    }

    pub fn with_overestimation(&mut self, policy: OverestimationPolicy) -> &mut Self {
        self.overestimation = policy;
        self
    }

    pub fn with_price_schedules(&mut self, schedules: PriceSchedules) -> &mut Self {
        self.price_schedules = schedules;
        self
    }

    pub fn with_supply(&mut self, supply: CircSupplyCalculator) -> &mut Self {
        self.supply = supply;
        self
    }

    /// Create a [`MachineContext`] for a given `epoch` with the specified `initial_state`.
    pub fn for_epoch(
        &self,
        epoch: ChainEpoch,
        base_fee: TokenAmount,
        initial_state: Cid,
    ) -> MachineContext {
        MachineContext {
            network: self.clone(),
            epoch,
            base_fee,
            initial_state_root: initial_state,
            price_list: self.price_schedules.price_list_for(epoch).clone(),
            circ_supply: TokenAmount::zero(),
        }
    }
}

/// Per-epoch machine context.
#[derive(Clone, Debug, Deref, DerefMut)]
pub struct MachineContext {
    /// Network-level settings.
    #[deref]
    #[deref_mut]
    pub network: NetworkConfig,

    pub epoch: ChainEpoch,

    pub base_fee: TokenAmount,

    /// Parent state the epoch's messages are applied on top of.
    pub initial_state_root: Cid,

    /// The price list in force at `epoch`.
    pub price_list: PriceList,

    /// The circulating supply at the start of the epoch. Computed by the machine on construction.
    pub circ_supply: TokenAmount,
}

impl MachineContext {
    /// Replace the price list in force for this epoch.
    pub fn set_price_list(&mut self, price_list: PriceList) -> &mut Self {
        self.price_list = price_list;
        self
    }
}

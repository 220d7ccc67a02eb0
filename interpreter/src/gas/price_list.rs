// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::{MethodNum, METHOD_SEND};

use super::{Gas, GasCharge};
use crate::epochs::{EpochTable, EpochTableError, UPGRADE_CALICO_HEIGHT};

/// Prices in force from genesis until the Calico upgrade.
pub const GENESIS_PRICES: PriceList = PriceList {
    storage_gas_multiplier: 1000,

    on_chain_message_compute_base: 0,
    on_chain_message_storage_base: 36,
    on_chain_message_storage_per_byte: 1,

    on_chain_return_value_per_byte: 1,

    send_base: 29233,
    send_transfer_funds: 27500,
    send_transfer_only_premium: 159672,
    send_invoke_method: -5377,

    ipld_get_base: 75242,
    ipld_put_base: 84070,
    ipld_put_per_byte: 1,

    create_actor_compute: 1108454,
    create_actor_storage: 36 + 40,
    delete_actor: -(36 + 40),

    hashing_base: 31355,

    get_randomness_base: 0,
    get_randomness_per_byte: 0,
};

/// Calico raised the storage multiplier and repriced message inclusion and IPLD access.
pub const CALICO_PRICES: PriceList = PriceList {
    storage_gas_multiplier: 1300,
    on_chain_message_compute_base: 38863,
    ipld_get_base: 114617,
    ipld_put_base: 353640,
    ..GENESIS_PRICES
};

/// Gas prices for everything the interpreter meters.
///
/// The all-zero [`Default`] list is useful as a base for custom schedules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PriceList {
    /// Scales every storage component.
    pub storage_gas_multiplier: Gas,

    /// Inclusion cost of a chain message, charged whether or not it executes. Storage is
    /// `(base + per_byte * size) * multiplier`. It is also what a block producer pays as a
    /// penalty for including a message that turns out to be invalid.
    pub on_chain_message_compute_base: Gas,
    pub on_chain_message_storage_base: Gas,
    pub on_chain_message_storage_per_byte: Gas,

    /// Storage, per byte of the top-level return value.
    pub on_chain_return_value_per_byte: Gas,

    /// Every send, nested or top-level.
    pub send_base: Gas,
    /// Added when the send carries value.
    pub send_transfer_funds: Gas,
    /// Added on top of `send_transfer_funds` for bare value transfers.
    pub send_transfer_only_premium: Gas,
    /// Added when the send runs a method.
    pub send_invoke_method: Gas,

    pub ipld_get_base: Gas,
    pub ipld_put_base: Gas,
    pub ipld_put_per_byte: Gas,

    pub create_actor_compute: Gas,
    pub create_actor_storage: Gas,

    /// Negative, refunding part of creation.
    pub delete_actor: Gas,

    pub hashing_base: Gas,

    pub get_randomness_base: Gas,
    pub get_randomness_per_byte: Gas,
}

impl PriceList {
    /// Inclusion of a chain message `msg_size` bytes long.
    #[inline]
    pub fn on_chain_message(&self, msg_size: usize) -> GasCharge {
        GasCharge::new(
            "OnChainMessage",
            self.on_chain_message_compute_base,
            (self.on_chain_message_storage_base
                + self.on_chain_message_storage_per_byte * msg_size as i64)
                * self.storage_gas_multiplier,
        )
    }

    /// Putting the top-level return value in the receipt.
    #[inline]
    pub fn on_chain_return_value(&self, data_size: usize) -> GasCharge {
        GasCharge::new(
            "OnChainReturnValue",
            0,
            data_size as i64 * self.on_chain_return_value_per_byte * self.storage_gas_multiplier,
        )
    }

    #[inline]
    pub fn on_method_invocation(&self, value: &TokenAmount, method_num: MethodNum) -> GasCharge {
        let transfers = !value.is_zero();
        let invokes = method_num != METHOD_SEND;
        let mut compute = self.send_base;
        if transfers {
            compute += self.send_transfer_funds;
        }
        if transfers && !invokes {
            compute += self.send_transfer_only_premium;
        }
        if invokes {
            compute += self.send_invoke_method;
        }
        GasCharge::new("OnMethodInvocation", compute, 0)
    }

    #[inline]
    pub fn on_ipld_get(&self) -> GasCharge {
        GasCharge::new("OnIpldGet", self.ipld_get_base, 0)
    }

    #[inline]
    pub fn on_ipld_put(&self, data_size: usize) -> GasCharge {
        GasCharge::new(
            "OnIpldPut",
            self.ipld_put_base,
            data_size as i64 * self.ipld_put_per_byte * self.storage_gas_multiplier,
        )
    }

    #[inline]
    pub fn on_create_actor(&self) -> GasCharge {
        GasCharge::new(
            "OnCreateActor",
            self.create_actor_compute,
            self.create_actor_storage * self.storage_gas_multiplier,
        )
    }

    #[inline]
    pub fn on_delete_actor(&self) -> GasCharge {
        GasCharge::new(
            "OnDeleteActor",
            0,
            self.delete_actor * self.storage_gas_multiplier,
        )
    }

    /// Flat, whatever the input size.
    #[inline]
    pub fn on_hashing(&self, _: usize) -> GasCharge {
        GasCharge::new("OnHashing", self.hashing_base, 0)
    }

    /// Base plus a per-byte charge on the caller's entropy.
    #[inline]
    pub fn on_get_randomness(&self, entropy_size: usize) -> GasCharge {
        GasCharge::new(
            "OnGetRandomness",
            self.get_randomness_base.saturating_add(
                self.get_randomness_per_byte
                    .saturating_mul(entropy_size as i64),
            ),
            0,
        )
    }
}

/// The price lists in force over the whole epoch axis.
#[derive(Clone, Debug)]
pub struct PriceSchedules(EpochTable<PriceList>);

impl PriceSchedules {
    /// Build a schedule table from `(activation_epoch, prices)` pairs. The first pair must
    /// activate at genesis.
    pub fn new(entries: Vec<(ChainEpoch, PriceList)>) -> Result<Self, EpochTableError> {
        EpochTable::new(entries).map(Self)
    }

    /// A single price list for every epoch.
    pub fn constant(prices: PriceList) -> Self {
        Self(EpochTable::constant(prices))
    }

    /// The mainnet schedule: genesis prices, repriced at Calico.
    pub fn mainnet() -> Self {
        Self(EpochTable::from_sorted(vec![
            (0, GENESIS_PRICES),
            (UPGRADE_CALICO_HEIGHT, CALICO_PRICES),
        ]))
    }

    /// Returns the price list in force at the given epoch.
    pub fn price_list_for(&self, epoch: ChainEpoch) -> &PriceList {
        self.0.get(epoch)
    }
}

impl Default for PriceSchedules {
    fn default() -> Self {
        Self::mainnet()
    }
}

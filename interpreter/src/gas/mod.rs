// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use self::charge::GasCharge;
pub use self::outputs::{GasOutputs, OverestimationPolicy};
pub use self::price_list::{PriceList, PriceSchedules, CALICO_PRICES, GENESIS_PRICES};
use crate::kernel::{ExecutionError, Result};

mod charge;
mod outputs;
mod price_list;

/// Gas units. Charges may be negative (refunds for deleting state).
pub type Gas = i64;

/// Tracks the gas consumed by a single message against its limit.
#[derive(Debug)]
pub struct GasTracker {
    gas_limit: Gas,
    gas_used: Gas,
}

impl GasTracker {
    pub fn new(gas_limit: Gas, gas_used: Gas) -> Self {
        Self {
            gas_limit,
            gas_used,
        }
    }

    /// Record `charge`, failing with out-of-gas if it would cross the limit. A failed charge
    /// still uses up the whole limit.
    pub fn charge_gas(&mut self, charge: GasCharge) -> Result<()> {
        let to_use = charge.total();
        match self.gas_used.checked_add(to_use) {
            None => {
                log::trace!("gas overflow: {}", charge.name);
                self.gas_used = self.gas_limit;
                Err(ExecutionError::OutOfGas)
            }
            Some(used) if used > self.gas_limit => {
                log::trace!("out of gas: {}", charge.name);
                self.gas_used = self.gas_limit;
                Err(ExecutionError::OutOfGas)
            }
            Some(used) => {
                log::trace!("charged {} gas: {}", to_use, charge.name);
                self.gas_used = used;
                Ok(())
            }
        }
    }

    pub fn gas_limit(&self) -> Gas {
        self.gas_limit
    }

    pub fn gas_used(&self) -> Gas {
        self.gas_used
    }

    pub fn gas_available(&self) -> Gas {
        self.gas_limit - self.gas_used
    }
}

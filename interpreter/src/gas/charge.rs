// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::borrow::Cow;

use super::Gas;

/// Single gas charge in the VM. Contains information about what gas was for, as well
/// as the amount of gas needed for computation and storage respectively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasCharge {
    pub name: Cow<'static, str>,
    pub compute_gas: Gas,
    pub storage_gas: Gas,
}

impl GasCharge {
    pub fn new(name: impl Into<Cow<'static, str>>, compute_gas: Gas, storage_gas: Gas) -> Self {
        Self {
            name: name.into(),
            compute_gas,
            storage_gas,
        }
    }

    /// Total gas of the charge, saturating on overflow.
    pub fn total(&self) -> Gas {
        self.compute_gas.saturating_add(self.storage_gas)
    }
}

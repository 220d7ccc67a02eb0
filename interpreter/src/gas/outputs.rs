// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::econ::TokenAmount;

use super::Gas;

/// How much of the gas reserved above actual usage is burned instead of refunded.
///
/// A message may use up to `tolerance` times its gas usage as a limit without penalty. Beyond
/// that, a share of the unused gas proportional to the overestimation is burned, scaled by
/// `burn_rate`. The default is Filecoin's: 10% tolerance, full burn rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverestimationPolicy {
    pub tolerance_num: i64,
    pub tolerance_denom: i64,
    pub burn_rate_num: i64,
    pub burn_rate_denom: i64,
}

impl OverestimationPolicy {
    /// Filecoin's published constants: `GasOveruseNum = 11`, `GasOveruseDenom = 10`.
    pub const FILECOIN: Self = Self {
        tolerance_num: 11,
        tolerance_denom: 10,
        burn_rate_num: 1,
        burn_rate_denom: 1,
    };

    /// Refund all unused gas.
    pub const DISABLED: Self = Self {
        burn_rate_num: 0,
        ..Self::FILECOIN
    };

    /// Splits the unused gas `gas_limit - gas_used` into `(refund, burn)`.
    pub fn split(&self, gas_used: Gas, gas_limit: Gas) -> (Gas, Gas) {
        let unused = gas_limit - gas_used;
        if unused <= 0 {
            return (0, 0);
        }
        if gas_used <= 0 {
            let burn = self.scale_burn(gas_limit as i128);
            return (gas_limit - burn, burn);
        }

        let tolerated =
            gas_used as i128 * self.tolerance_num as i128 / self.tolerance_denom as i128;
        let over = (gas_limit as i128 - tolerated).min(gas_used as i128);
        if over <= 0 {
            return (unused, 0);
        }

        let burn = self.scale_burn(unused as i128 * over / gas_used as i128);
        (unused - burn, burn)
    }

    fn scale_burn(&self, burn: i128) -> Gas {
        if self.burn_rate_denom == 0 {
            return 0;
        }
        (burn * self.burn_rate_num as i128 / self.burn_rate_denom as i128) as Gas
    }
}

impl Default for OverestimationPolicy {
    fn default() -> Self {
        Self::FILECOIN
    }
}

/// The fee split of an applied message.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct GasOutputs {
    pub base_fee_burn: TokenAmount,
    pub over_estimation_burn: TokenAmount,
    pub miner_penalty: TokenAmount,
    pub miner_tip: TokenAmount,
    pub refund: TokenAmount,

    // In whole gas units.
    pub gas_refund: Gas,
    pub gas_burned: Gas,
}

impl GasOutputs {
    pub fn compute(
        gas_used: Gas,
        gas_limit: Gas,
        base_fee: &TokenAmount,
        fee_cap: &TokenAmount,
        gas_premium: &TokenAmount,
        policy: &OverestimationPolicy,
    ) -> Self {
        let mut base_fee_to_pay = base_fee;

        let mut out = GasOutputs::default();

        if base_fee > fee_cap {
            base_fee_to_pay = fee_cap;
            out.miner_penalty = (base_fee - fee_cap) * gas_used;
        }

        out.base_fee_burn = base_fee_to_pay * gas_used;

        let mut miner_tip = gas_premium.clone();
        if &(base_fee_to_pay + &miner_tip) > fee_cap {
            miner_tip = fee_cap - base_fee_to_pay;
        }
        out.miner_tip = &miner_tip * gas_limit;

        (out.gas_refund, out.gas_burned) = policy.split(gas_used, gas_limit);

        if out.gas_burned != 0 {
            out.over_estimation_burn = base_fee_to_pay * out.gas_burned;
            out.miner_penalty =
                &out.miner_penalty + (base_fee - base_fee_to_pay) * out.gas_burned;
        }
        let required_funds = fee_cap * gas_limit;
        let refund =
            required_funds - &out.base_fee_burn - &out.miner_tip - &out.over_estimation_burn;
        out.refund = refund;
        out
    }
}

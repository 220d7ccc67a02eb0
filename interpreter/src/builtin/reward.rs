// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A minimal reward actor: it holds the block reward pool, pays rewards to block producers when
//! the system asks it to, and keeps the running total of mined tokens. Penalties the producer
//! incurred in the block are withheld from the payout and burnt.

use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, MethodNum, METHOD_CONSTRUCTOR, METHOD_SEND};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{BURNT_FUNDS_ACTOR_ID, SYSTEM_ACTOR_ID};
use crate::actor_error;
use crate::actor_error::Abort;
use crate::engine::ActorCode;
use crate::runtime::{Runtime, RuntimeExt};

pub const REWARD_ACTOR_ID: ActorID = 2;
pub const REWARD_ACTOR_ADDR: Address = Address::new_id(REWARD_ACTOR_ID);

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    /// Tokens paid out as block rewards so far. Gas rewards are not included.
    pub total_mined: TokenAmount,
}

#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    AwardBlockReward = 2,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct AwardBlockRewardParams {
    pub miner: Address,
    pub reward: TokenAmount,
    pub gas_reward: TokenAmount,
    /// Burnt out of the payout, up to the whole payout.
    pub penalty: TokenAmount,
}

pub struct Actor;

impl Actor {
    fn constructor(rt: &mut dyn Runtime) -> Result<(), Abort> {
        rt.validate_immediate_caller_is(&[SYSTEM_ACTOR_ID])?;
        rt.create(&State::default())
    }

    fn award_block_reward(
        rt: &mut dyn Runtime,
        params: AwardBlockRewardParams,
    ) -> Result<(), Abort> {
        rt.validate_immediate_caller_is(&[SYSTEM_ACTOR_ID])?;

        if params.reward.is_negative()
            || params.gas_reward.is_negative()
            || params.penalty.is_negative()
        {
            return Err(actor_error!(
                illegal_argument;
                "negative reward {}, gas reward {} or penalty {}",
                params.reward,
                params.gas_reward,
                params.penalty
            )
            .into());
        }

        let total = &params.reward + &params.gas_reward;
        let balance = rt.current_balance()?;
        if total > balance {
            return Err(actor_error!(
                illegal_state;
                "reward {} exceeds balance {}",
                total,
                balance
            )
            .into());
        }

        rt.transaction(|st: &mut State, _| {
            st.total_mined = &st.total_mined + &params.reward;
            Ok(())
        })?;

        let penalty = std::cmp::min(params.penalty, total.clone());
        let payable = &total - &penalty;
        if !penalty.is_zero() {
            let burnt = Address::new_id(BURNT_FUNDS_ACTOR_ID);
            let ret = rt.send(&burnt, METHOD_SEND, &RawBytes::default(), &penalty)?;
            if !ret.exit_code.is_success() {
                return rt.abort(ret.exit_code, "failed to burn miner penalty");
            }
        }

        let ret = rt.send(&params.miner, METHOD_SEND, &RawBytes::default(), &payable)?;
        if !ret.exit_code.is_success() {
            return rt.abort(ret.exit_code, "failed to send reward to miner");
        }
        Ok(())
    }
}

impl ActorCode for Actor {
    fn invoke_method(
        &self,
        rt: &mut dyn Runtime,
        method: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, Abort> {
        match FromPrimitive::from_u64(method) {
            Some(Method::Constructor) => {
                Self::constructor(rt)?;
                Ok(RawBytes::default())
            }
            Some(Method::AwardBlockReward) => {
                let params = rt.deserialize_params(params)?;
                Self::award_block_reward(rt, params)?;
                Ok(RawBytes::default())
            }
            None => Err(actor_error!(unhandled_message; "invalid method: {}", method).into()),
        }
    }
}

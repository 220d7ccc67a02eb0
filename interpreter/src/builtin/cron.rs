// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The cron actor calls a fixed list of actor methods once per epoch, after every block's
//! messages have been applied.

use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, MethodNum, METHOD_CONSTRUCTOR};
use log::debug;
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive, Zero};

use super::SYSTEM_ACTOR_ID;
use crate::actor_error;
use crate::actor_error::Abort;
use crate::engine::ActorCode;
use crate::kernel::ExecutionError;
use crate::runtime::{Runtime, RuntimeExt};

pub const CRON_ACTOR_ID: ActorID = 3;
pub const CRON_ACTOR_ADDR: Address = Address::new_id(CRON_ACTOR_ID);

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    pub entries: Vec<Entry>,
}

/// A method called on every tick. It receives empty parameters and no value.
#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub receiver: Address,
    pub method_num: MethodNum,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstructorParams {
    pub entries: Vec<Entry>,
}

#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    EpochTick = 2,
}

pub struct Actor;

impl Actor {
    fn constructor(rt: &mut dyn Runtime, params: ConstructorParams) -> Result<(), Abort> {
        rt.validate_immediate_caller_is(&[SYSTEM_ACTOR_ID])?;
        rt.create(&State {
            entries: params.entries,
        })
    }

    /// Failing entries do not fail the tick. Running out of gas does.
    fn epoch_tick(rt: &mut dyn Runtime) -> Result<(), Abort> {
        rt.validate_immediate_caller_is(&[SYSTEM_ACTOR_ID])?;

        let st: State = rt.state()?;
        for entry in st.entries {
            match rt.send(
                &entry.receiver,
                entry.method_num,
                &RawBytes::default(),
                &TokenAmount::zero(),
            ) {
                Ok(ret) if ret.exit_code.is_success() => {}
                Ok(ret) => debug!(
                    "cron entry {}:{} exited with {}",
                    entry.receiver,
                    entry.method_num,
                    ret.exit_code.value()
                ),
                Err(ExecutionError::Syscall(e)) => debug!(
                    "cron entry {}:{} not delivered: {}",
                    entry.receiver, entry.method_num, e
                ),
                Err(e) => return Err(e.into()),
            }
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
                let params = rt.deserialize_params(params)?;
                Self::constructor(rt, params)?;
                Ok(RawBytes::default())
            }
            Some(Method::EpochTick) => {
                Self::epoch_tick(rt)?;
                Ok(RawBytes::default())
            }
            None => Err(actor_error!(unhandled_message; "invalid method: {}", method).into()),
        }
    }
}

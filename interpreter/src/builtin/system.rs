// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::RawBytes;
use fvm_shared::{ActorID, MethodNum, METHOD_CONSTRUCTOR};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::actor_error;
use crate::actor_error::Abort;
use crate::engine::ActorCode;
use crate::runtime::{Runtime, RuntimeExt};

/// The system actor is the caller of every implicit message and of account constructors.
pub const SYSTEM_ACTOR_ID: ActorID = 0;

#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
}

/// The system actor has no state and a single constructor.
pub struct Actor;

impl ActorCode for Actor {
    fn invoke_method(
        &self,
        rt: &mut dyn Runtime,
        method: MethodNum,
        _params: &RawBytes,
    ) -> Result<RawBytes, Abort> {
        match FromPrimitive::from_u64(method) {
            Some(Method::Constructor) => {
                rt.validate_immediate_caller_is(&[SYSTEM_ACTOR_ID])?;
                Ok(RawBytes::default())
            }
            None => Err(actor_error!(unhandled_message; "invalid method: {}", method).into()),
        }
    }
}

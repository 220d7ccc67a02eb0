// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The account actor represents an external key-holding party. Its only state is the public key
//! address it was created for.

use anyhow::anyhow;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{CborStore, RawBytes};
use fvm_shared::address::{Address, Protocol};
use fvm_shared::{MethodNum, METHOD_CONSTRUCTOR};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{is_account_actor, SYSTEM_ACTOR_ID};
use crate::actor_error::Abort;
use crate::engine::ActorCode;
use crate::kernel::{ClassifyResult, Result};
use crate::runtime::{serialize_return, Runtime, RuntimeExt};
use crate::state_tree::StateTree;
use crate::{actor_error, syscall_error};

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub address: Address,
}

#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    PubkeyAddress = 2,
}

/// Returns true for the address protocols an account can be keyed by.
pub fn is_key_address(addr: &Address) -> bool {
    matches!(addr.protocol(), Protocol::BLS | Protocol::Secp256k1)
}

/// Resolves an address to the key address of the account actor behind it. Key addresses are
/// returned as-is.
pub fn resolve_to_key_addr<B: Blockstore>(tree: &StateTree<B>, addr: &Address) -> Result<Address> {
    if is_key_address(addr) {
        return Ok(*addr);
    }

    let act = tree
        .get_actor_by_address(addr)?
        .ok_or_else(|| syscall_error!(NotFound; "actor {} not found", addr))?;

    if !is_account_actor(&act.code) {
        return Err(syscall_error!(
            IllegalArgument;
            "target actor {} is not an account",
            addr
        )
        .into());
    }

    let state: State = tree
        .store()
        .get_cbor(&act.state)
        .or_fatal()?
        .ok_or_else(|| anyhow!("account state not found for {}", addr))
        .or_fatal()?;

    Ok(state.address)
}

pub struct Actor;

impl Actor {
    fn constructor(rt: &mut dyn Runtime, address: Address) -> std::result::Result<(), Abort> {
        rt.validate_immediate_caller_is(&[SYSTEM_ACTOR_ID])?;
        if !is_key_address(&address) {
            return Err(actor_error!(
                illegal_argument;
                "address must use BLS or SECP protocol, got {}",
                address.protocol()
            )
            .into());
        }
        rt.create(&State { address })
    }

    fn pubkey_address(rt: &mut dyn Runtime) -> std::result::Result<Address, Abort> {
        rt.validate_immediate_caller_accept_any()?;
        let st: State = rt.state()?;
        Ok(st.address)
    }
}

impl ActorCode for Actor {
    fn invoke_method(
        &self,
        rt: &mut dyn Runtime,
        method: MethodNum,
        params: &RawBytes,
    ) -> std::result::Result<RawBytes, Abort> {
        match FromPrimitive::from_u64(method) {
            Some(Method::Constructor) => {
                let address = rt.deserialize_params(params)?;
                Self::constructor(rt, address)?;
                Ok(RawBytes::default())
            }
            Some(Method::PubkeyAddress) => serialize_return(&Self::pubkey_address(rt)?),
            None => Err(actor_error!(unhandled_message; "invalid method: {}", method).into()),
        }
    }
}

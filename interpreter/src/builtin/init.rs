// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The init actor hands out actor IDs. It keeps the map from robust and key addresses to IDs,
//! and it is the only way for an actor to create another (non-singleton) actor.

use anyhow::Context;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{CborStore, RawBytes};
use fvm_ipld_hamt::Hamt;
use fvm_shared::address::{Address, Payload};
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, MethodNum, HAMT_BIT_WIDTH, METHOD_CONSTRUCTOR};
use multihash_codetable::Code;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{INIT_ACTOR_CODE_ID, SYSTEM_ACTOR_ID};
use crate::actor_error::Abort;
use crate::engine::ActorCode;
use crate::kernel::{ClassifyResult, Result};
use crate::runtime::{serialize_return, Runtime, RuntimeExt};
use crate::state_tree::{ActorState, StateTree};
use crate::{actor_error, EMPTY_ARR_CID};

pub const INIT_ACTOR_ID: ActorID = 1;
pub const INIT_ACTOR_ADDR: Address = Address::new_id(INIT_ACTOR_ID);

/// The first ID handed out to non-singleton actors.
pub const FIRST_NON_SINGLETON_ID: ActorID = 100;

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub address_map: Cid,
    pub next_id: ActorID,
    pub network_name: String,
}

impl State {
    /// An empty address table.
    pub fn new<B: Blockstore>(store: &B, network_name: &str) -> Result<Self> {
        let address_map = Hamt::<_, ActorID>::new_with_bit_width(store, HAMT_BIT_WIDTH)
            .flush()
            .context("failed to create empty address map")
            .or_fatal()?;
        Ok(State {
            address_map,
            next_id: FIRST_NON_SINGLETON_ID,
            network_name: network_name.to_owned(),
        })
    }

    /// Writes a fresh init actor into the state tree. Used when building genesis states.
    pub fn install<B: Blockstore>(tree: &mut StateTree<B>, network_name: &str) -> Result<()> {
        let state = Self::new(tree.store(), network_name)?;
        let head = tree.store().put_cbor(&state, Code::Blake2b256).or_fatal()?;
        tree.set_actor(
            INIT_ACTOR_ID,
            ActorState::new(*INIT_ACTOR_CODE_ID, head, TokenAmount::default(), 0),
        );
        Ok(())
    }

    /// Read the init actor and its state out of `state_tree`. Both are returned so the caller
    /// can write an updated state back.
    pub fn load<B>(state_tree: &StateTree<B>) -> Result<(Self, ActorState)>
    where
        B: Blockstore,
    {
        let init_act = state_tree
            .get_actor(INIT_ACTOR_ID)?
            .context("state tree has no init actor")
            .or_fatal()?;

        let state = state_tree
            .store()
            .get_cbor(&init_act.state)
            .or_fatal()?
            .context("init actor state is missing from the store")
            .or_fatal()?;

        Ok((state, init_act))
    }

    /// Give `addr` the next ID. The updated state must still be written back by the caller.
    pub fn map_address_to_new_id<B>(&mut self, store: B, addr: &Address) -> Result<ActorID>
    where
        B: Blockstore,
    {
        let id = self.next_id;
        self.next_id += 1;

        let mut map = Hamt::<B, _>::load_with_bit_width(&self.address_map, store, HAMT_BIT_WIDTH)
            .or_fatal()?;
        map.set(addr.to_bytes().into(), id).or_fatal()?;
        self.address_map = map.flush().or_fatal()?;

        Ok(id)
    }

    /// Resolves an address to an actor ID. ID addresses pass through unchanged, other addresses
    /// are looked up in the table and yield `None` when unknown.
    pub fn resolve_address<B>(&self, store: B, addr: &Address) -> Result<Option<ActorID>>
    where
        B: Blockstore,
    {
        if let &Payload::ID(id) = addr.payload() {
            return Ok(Some(id));
        }

        let map = Hamt::<B, ActorID>::load_with_bit_width(&self.address_map, store, HAMT_BIT_WIDTH)
            .or_fatal()?;

        Ok(map.get(&addr.to_bytes()).or_fatal()?.copied())
    }
}

#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    Exec = 2,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct ConstructorParams {
    pub network_name: String,
}

/// Init actor Exec Params
#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct ExecParams {
    pub code_cid: Cid,
    pub constructor_params: RawBytes,
}

/// Init actor Exec Return value
#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct ExecReturn {
    /// ID based address for created actor
    pub id_address: Address,
    /// Reorg safe address for actor
    pub robust_address: Address,
}

pub struct Actor;

impl Actor {
    fn constructor(
        rt: &mut dyn Runtime,
        params: ConstructorParams,
    ) -> std::result::Result<(), Abort> {
        rt.validate_immediate_caller_is(&[SYSTEM_ACTOR_ID])?;
        let st = State {
            address_map: rt.ipld_put(&fvm_ipld_encoding::to_vec(&EmptyMap::default())?)?,
            next_id: FIRST_NON_SINGLETON_ID,
            network_name: params.network_name,
        };
        rt.create(&st)
    }

    /// Creates a new actor of the given code, assigning it both an ID address and a robust
    /// address, and runs its constructor with the value received.
    fn exec(rt: &mut dyn Runtime, params: ExecParams) -> std::result::Result<ExecReturn, Abort> {
        rt.validate_immediate_caller_accept_any()?;

        let robust_address = rt.new_actor_address()?;
        let id = rt.register_actor_address(&robust_address)?;

        rt.create_actor(params.code_cid, id, *EMPTY_ARR_CID)?;

        let id_address = Address::new_id(id);
        let value = rt.msg_value_received();
        let ret = rt.send(
            &id_address,
            METHOD_CONSTRUCTOR,
            &params.constructor_params,
            &value,
        )?;
        if !ret.exit_code.is_success() {
            return rt.abort(ret.exit_code, "constructor failed");
        }

        Ok(ExecReturn {
            id_address,
            robust_address,
        })
    }
}

/// The serialized form of an empty HAMT root.
#[derive(Serialize_tuple, Deserialize_tuple, Default)]
struct EmptyMap {
    bitfield: RawBytes,
    pointers: Vec<()>,
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
                let params = rt.deserialize_params(params)?;
                Self::constructor(rt, params)?;
                Ok(RawBytes::default())
            }
            Some(Method::Exec) => {
                let params = rt.deserialize_params(params)?;
                let ret = Self::exec(rt, params)?;
                serialize_return(&ret)
            }
            None => Err(actor_error!(unhandled_message; "invalid method: {}", method).into()),
        }
    }
}

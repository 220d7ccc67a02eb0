// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::{RawBytes, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, MethodNum};
use multihash_codetable::{Code, MultihashDigest};

use super::error::Result;
use super::*;
use crate::builtin::{self, INIT_ACTOR_ID};
use crate::call_manager::{CallManager, InvocationResult};
use crate::externs::Rand;
use crate::gas::{Gas, GasCharge};
use crate::machine::Machine;
use crate::rand::{blake2b_256, DomainSeparationTag};
use crate::state_tree::ActorState;
use crate::syscall_error;

/// The kernel for one actor invocation. Parameters go straight to the actor and are not kept.
pub struct DefaultKernel<C> {
    caller: ActorID,
    actor_id: ActorID,
    method: MethodNum,
    value_received: TokenAmount,

    /// Lent to the callee's kernel for the duration of each nested send.
    call_manager: C,
}

impl<C> Kernel for DefaultKernel<C>
where
    C: CallManager,
{
    type CallManager = C;

    fn into_inner(self) -> Self::CallManager
    where
        Self: Sized,
    {
        self.call_manager
    }

    fn new(
        mgr: C,
        caller: ActorID,
        actor_id: ActorID,
        method: MethodNum,
        value_received: TokenAmount,
    ) -> Self {
        DefaultKernel {
            call_manager: mgr,
            caller,
            actor_id,
            method,
            value_received,
        }
    }
}

impl<C> DefaultKernel<C>
where
    C: CallManager,
{
    /// `None` once the actor has deleted itself.
    fn get_self(&self) -> Result<Option<ActorState>> {
        self.call_manager
            .state_tree()
            .get_actor(self.actor_id)
            .context("failed to load the running actor")
    }

    fn mutate_self<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ActorState) -> Result<()>,
    {
        self.call_manager
            .state_tree_mut()
            .maybe_mutate_actor_id(self.actor_id, mutate)
            .context("failed to mutate self")
            .and_then(|found| {
                if found {
                    Ok(())
                } else {
                    Err(syscall_error!(IllegalOperation; "actor deleted").into())
                }
            })
    }
}

impl<C> SelfOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn root(&self) -> Result<Cid> {
        Ok(self
            .get_self()?
            .ok_or_else(|| {
                syscall_error!(IllegalOperation; "state root requested after actor deletion")
            })?
            .state)
    }

    fn set_root(&mut self, new: Cid) -> Result<()> {
        if !self.call_manager.blockstore().has(&new).or_fatal()? {
            return Err(
                syscall_error!(NotFound; "new state root {} is not in the store", new).into(),
            );
        }

        self.mutate_self(|actor_state| {
            actor_state.state = new;
            Ok(())
        })
    }

    fn current_balance(&self) -> Result<TokenAmount> {
        // Deleted actors hold nothing.
        Ok(self.get_self()?.map(|a| a.balance).unwrap_or_default())
    }

    fn self_destruct(&mut self, beneficiary: &Address) -> Result<()> {
        self.call_manager
            .charge_gas(self.call_manager.price_list().on_delete_actor())?;

        let balance = self.current_balance()?;
        if !balance.is_zero() {
            let beneficiary_id = self
                .resolve_address(beneficiary)?
                .ok_or_else(|| syscall_error!(NotFound; "beneficiary doesn't exist"))?;

            if beneficiary_id == self.actor_id {
                return Err(syscall_error!(Forbidden; "actor cannot pay itself on deletion").into());
            }

            self.call_manager
                .machine_mut()
                .transfer(self.actor_id, beneficiary_id, &balance)?;
        }

        self.call_manager.state_tree_mut().delete_actor(self.actor_id);
        Ok(())
    }
}

impl<C> IpldOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn ipld_get(&mut self, cid: &Cid) -> Result<Vec<u8>> {
        self.call_manager
            .charge_gas(self.call_manager.price_list().on_ipld_get())?;

        self.call_manager
            .blockstore()
            .get(cid)
            .or_fatal()?
            .ok_or_else(|| syscall_error!(NotFound; "block {} not found", cid).into())
    }

    fn ipld_put(&mut self, data: &[u8]) -> Result<Cid> {
        self.call_manager
            .charge_gas(self.call_manager.price_list().on_ipld_put(data.len()))?;

        let k = Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(data));
        self.call_manager
            .blockstore()
            .put_keyed(&k, data)
            .or_fatal()?;
        Ok(k)
    }
}

impl<C> MessageOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn msg_caller(&self) -> ActorID {
        self.caller
    }

    fn msg_origin(&self) -> ActorID {
        self.call_manager.origin()
    }

    fn msg_receiver(&self) -> ActorID {
        self.actor_id
    }

    fn msg_method_number(&self) -> MethodNum {
        self.method
    }

    fn msg_value_received(&self) -> TokenAmount {
        self.value_received.clone()
    }
}

impl<C> SendOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn send(
        &mut self,
        recipient: &Address,
        method: MethodNum,
        params: &RawBytes,
        value: &TokenAmount,
    ) -> Result<InvocationResult> {
        let from = self.actor_id;

        self.call_manager
            .with_transaction(|cm| cm.send::<Self>(from, *recipient, method, params, value))
    }
}

impl<C> CircSupplyOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn total_fil_circ_supply(&self) -> Result<TokenAmount> {
        Ok(self.call_manager.context().circ_supply.clone())
    }
}

impl<C> GasOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn gas_used(&self) -> Gas {
        self.call_manager.gas_tracker().gas_used()
    }

    fn gas_available(&self) -> Gas {
        self.call_manager.gas_tracker().gas_available()
    }

    fn charge_gas(&mut self, name: &str, compute: Gas) -> Result<()> {
        if compute < 0 {
            return Err(syscall_error!(IllegalArgument;
                "gas charge {} must not be negative: {}", name, compute)
            .into());
        }
        let charge = GasCharge::new(name.to_owned(), compute, 0);
        self.call_manager.gas_tracker_mut().charge_gas(charge)
    }
}

impl<C> NetworkOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn network_epoch(&self) -> ChainEpoch {
        self.call_manager.context().epoch
    }

    fn network_base_fee(&self) -> &TokenAmount {
        &self.call_manager.context().base_fee
    }
}

impl<C> CryptoOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn hash_blake2b(&mut self, data: &[u8]) -> Result<[u8; 32]> {
        self.call_manager
            .charge_gas(self.call_manager.price_list().on_hashing(data.len()))?;

        Ok(blake2b_256(data))
    }
}

impl<C> RandomnessOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn get_randomness_from_tickets(
        &mut self,
        personalization: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; 32]> {
        self.call_manager.charge_gas(
            self.call_manager
                .price_list()
                .on_get_randomness(entropy.len()),
        )?;

        self.call_manager
            .externs()
            .get_chain_randomness(personalization, rand_epoch, entropy)
            .or_illegal_argument()
    }

    fn get_randomness_from_beacon(
        &mut self,
        personalization: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; 32]> {
        self.call_manager.charge_gas(
            self.call_manager
                .price_list()
                .on_get_randomness(entropy.len()),
        )?;

        self.call_manager
            .externs()
            .get_beacon_randomness(personalization, rand_epoch, entropy)
            .or_illegal_argument()
    }
}

impl<C> ActorOps for DefaultKernel<C>
where
    C: CallManager,
{
    fn resolve_address(&self, address: &Address) -> Result<Option<ActorID>> {
        self.call_manager.state_tree().lookup_id(address)
    }

    fn get_actor_code_cid(&self, id: ActorID) -> Result<Option<Cid>> {
        Ok(self
            .call_manager
            .state_tree()
            .get_actor(id)
            .context("failed to lookup actor to get code CID")?
            .map(|act| act.code))
    }

    fn balance_of(&self, address: &Address) -> Result<TokenAmount> {
        let actor = self
            .call_manager
            .state_tree()
            .get_actor_by_address(address)?
            .ok_or_else(|| syscall_error!(NotFound; "actor {} not found", address))?;
        Ok(actor.balance)
    }

    fn resolve_to_key_addr(&mut self, address: &Address) -> Result<Address> {
        if builtin::account::is_key_address(address) {
            return Ok(*address);
        }

        self.call_manager
            .charge_gas(self.call_manager.price_list().on_ipld_get())?;

        builtin::account::resolve_to_key_addr(self.call_manager.state_tree(), address)
    }

    fn new_actor_address(&mut self) -> Result<Address> {
        Ok(self.call_manager.next_actor_address())
    }

    fn register_actor_address(&mut self, address: &Address) -> Result<ActorID> {
        if self.actor_id != INIT_ACTOR_ID {
            return Err(syscall_error!(Forbidden;
                "actor {} may not register addresses", self.actor_id)
            .into());
        }

        if self.call_manager.state_tree().lookup_id(address)?.is_some() {
            return Err(
                syscall_error!(Forbidden; "address {} is already registered", address).into(),
            );
        }

        self.call_manager
            .state_tree_mut()
            .register_new_address(address)
    }

    fn create_actor(&mut self, code_id: Cid, actor_id: ActorID, initial_state: Cid) -> Result<()> {
        if !self.call_manager.engine().contains(&code_id) {
            return Err(syscall_error!(Forbidden;
                "can only create registered actors, got {}", code_id)
            .into());
        }

        if builtin::is_singleton_actor(&code_id) {
            return Err(
                syscall_error!(Forbidden; "can only have one instance of singleton actors").into(),
            );
        }

        self.call_manager
            .create_actor(code_id, actor_id, initial_state)
    }
}

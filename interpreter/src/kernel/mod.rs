// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, MethodNum};

mod default;
mod error;

pub use default::DefaultKernel;
pub use error::{ClassifyResult, Context, ExecutionError, Result, SyscallError};

use crate::call_manager::{CallManager, InvocationResult};
use crate::gas::Gas;
use crate::rand::DomainSeparationTag;
use crate::runtime::Runtime;

/// The "kernel" implements the capabilities handed to a single actor invocation.
///
/// A kernel owns the [`CallManager`] for the duration of the invocation and gives it back through
/// [`Kernel::into_inner`] when the actor returns.
pub trait Kernel: Runtime + 'static {
    type CallManager: CallManager;

    /// Give the call manager back once the actor has returned.
    fn into_inner(self) -> Self::CallManager
    where
        Self: Sized;

    /// Set up the context for `actor_id` being invoked on `method` by its immediate `caller`,
    /// which already transferred `value_received`.
    fn new(
        mgr: Self::CallManager,
        caller: ActorID,
        actor_id: ActorID,
        method: MethodNum,
        value_received: TokenAmount,
    ) -> Self
    where
        Self: Sized;
}

/// Facts about the tipset being executed.
pub trait NetworkOps {
    fn network_epoch(&self) -> ChainEpoch;

    fn network_base_fee(&self) -> &TokenAmount;
}

/// The invocation being handled.
pub trait MessageOps {
    /// Immediate caller, which is not the chain message's sender for nested sends.
    fn msg_caller(&self) -> ActorID;

    /// Sender of the chain message.
    fn msg_origin(&self) -> ActorID;

    fn msg_receiver(&self) -> ActorID;

    fn msg_method_number(&self) -> MethodNum;

    fn msg_value_received(&self) -> TokenAmount;
}

/// Operations on the actor's own state and balance.
pub trait SelfOps {
    /// Fails with `IllegalOperation` once the actor has deleted itself.
    fn root(&self) -> Result<Cid>;

    /// Point the actor at a new state object, which must already be in the block store.
    fn set_root(&mut self, root: Cid) -> Result<()>;

    fn current_balance(&self) -> Result<TokenAmount>;

    /// Remove the running actor, paying its balance out to `beneficiary` first. When there is a
    /// balance to pay, the beneficiary must exist and must not be the actor itself.
    fn self_destruct(&mut self, beneficiary: &Address) -> Result<()>;
}

/// Block store access, charged per call and per byte written.
pub trait IpldOps {
    /// Read a block.
    fn ipld_get(&mut self, cid: &Cid) -> Result<Vec<u8>>;

    /// Write a DAG-CBOR block and return its CID.
    fn ipld_put(&mut self, data: &[u8]) -> Result<Cid>;
}

/// Queries about, and creation of, other actors.
pub trait ActorOps {
    /// Map any address to the ID it is registered under. ID addresses map to themselves, whether
    /// or not the actor exists.
    fn resolve_address(&self, address: &Address) -> Result<Option<ActorID>>;

    fn get_actor_code_cid(&self, id: ActorID) -> Result<Option<Cid>>;

    /// The balance of any actor. Fails with `NotFound` if the actor doesn't exist.
    fn balance_of(&self, address: &Address) -> Result<TokenAmount>;

    /// Resolves an address to the public key address backing the account actor it names.
    fn resolve_to_key_addr(&mut self, address: &Address) -> Result<Address>;

    /// A robust actor address for the next actor created by this message. It is derived from the
    /// chain message rather than from ID assignment, so it survives reordering.
    fn new_actor_address(&mut self) -> Result<Address>;

    /// Allocates an ID for a new actor and maps `address` to it in the init actor's table.
    /// Only the init actor may call this.
    fn register_actor_address(&mut self, address: &Address) -> Result<ActorID>;

    /// Creates an actor with the given code, ID and initial state root. Fails if an actor with
    /// that ID already exists, or if the code is not a constructible registered actor.
    fn create_actor(&mut self, code_id: Cid, actor_id: ActorID, initial_state: Cid) -> Result<()>;
}

pub trait SendOps {
    /// Send a message. The send runs in its own transaction: its state changes are committed only
    /// if it exits successfully.
    fn send(
        &mut self,
        recipient: &Address,
        method: MethodNum,
        params: &RawBytes,
        value: &TokenAmount,
    ) -> Result<InvocationResult>;
}

pub trait CircSupplyOps {
    /// Tokens in circulation as of the start of this epoch: vested, mined and disbursed reserve
    /// funds, less burnt and locked funds. See [`crate::circ_supply`].
    fn total_fil_circ_supply(&self) -> Result<TokenAmount>;
}

/// Gas metering visible to actors. Gas is shared by every call of the chain message.
pub trait GasOps {
    fn gas_used(&self) -> Gas;

    fn gas_available(&self) -> Gas;

    /// Charge `compute` gas under `name`, failing with out-of-gas once the limit is crossed.
    /// Negative charges are refused with `IllegalArgument`.
    fn charge_gas(&mut self, name: &str, compute: Gas) -> Result<()>;
}

pub trait CryptoOps {
    /// Blake2b-256.
    fn hash_blake2b(&mut self, data: &[u8]) -> Result<[u8; 32]>;
}

/// Randomness queries.
pub trait RandomnessOps {
    /// 32 bytes drawn from the ticket chain at `rand_epoch`. Tickets are fork dependent and can
    /// be biased by block producers.
    fn get_randomness_from_tickets(
        &mut self,
        tag: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; 32]>;

    /// 32 bytes drawn from the latest beacon entry at or before `rand_epoch`. Beacon entries are
    /// the same on every fork.
    fn get_randomness_from_beacon(
        &mut self,
        tag: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        entropy: &[u8],
    ) -> Result<[u8; 32]>;
}

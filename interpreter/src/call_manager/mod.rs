// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::{ActorID, MethodNum};

use crate::engine::Engine;
use crate::gas::{Gas, GasCharge, GasTracker, PriceList};
use crate::kernel::Result;
use crate::machine::{Machine, MachineContext};
use crate::state_tree::StateTree;
use crate::Kernel;

pub mod backtrace;
pub use backtrace::Backtrace;

mod default;

pub use default::DefaultCallManager;

/// Dispatches the sends of one chain message.
///
/// The executor hands the machine to a fresh call manager per message and issues the top-level
/// [`CallManager::send`]. Each send resolves the recipient, moves the call manager into a new
/// [`Kernel`] for the callee, runs the actor, and takes the call manager back once the actor
/// returns. Nested sends re-enter the same call manager through the callee's kernel, so a single
/// gas tracker and depth counter cover the whole stack.
pub trait CallManager: 'static {
    /// The machine sends are applied to.
    type Machine: Machine;

    /// `origin` and `nonce` identify the chain message; they seed actor address derivation.
    fn new(
        machine: Self::Machine,
        gas_limit: Gas,
        origin: ActorID,
        origin_address: Address,
        nonce: u64,
    ) -> Self;

    /// Invoke `method` on `to`, transferring `value` first. The callee runs on a `K` kernel.
    ///
    /// Aborts are reported through the exit code of the returned [`InvocationResult`]. Only
    /// dispatch failures (unknown receiver, insufficient funds, depth limit), running out of gas
    /// and fatal errors are returned as errors.
    fn send<K: Kernel<CallManager = Self>>(
        &mut self,
        from: ActorID,
        to: Address,
        method: MethodNum,
        params: &RawBytes,
        value: &TokenAmount,
    ) -> Result<InvocationResult>;

    /// Run `f` against a state-tree checkpoint, keeping its writes only if it succeeds with
    /// [`ExitCode::OK`].
    fn with_transaction(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<InvocationResult>,
    ) -> Result<InvocationResult>;

    /// Tear down the call stack, handing back the machine.
    fn finish(self) -> (FinishRet, Self::Machine);

    fn machine(&self) -> &Self::Machine;
    fn machine_mut(&mut self) -> &mut Self::Machine;

    fn gas_tracker(&self) -> &GasTracker;
    fn gas_tracker_mut(&mut self) -> &mut GasTracker;

    /// The account that sent the chain message.
    fn origin(&self) -> ActorID;

    /// The robust (f2) address the next created actor will receive. Stable until
    /// [`CallManager::create_actor`] succeeds.
    fn next_actor_address(&self) -> Address;

    /// Put a new actor into the state tree. Address registration is the init actor's job.
    fn create_actor(&mut self, code_id: Cid, actor_id: ActorID, state: Cid) -> Result<()>;

    fn engine(&self) -> &Engine {
        self.machine().engine()
    }

    /// Gas prices in force for this epoch.
    fn price_list(&self) -> &PriceList {
        &self.machine().context().price_list
    }

    fn context(&self) -> &MachineContext {
        self.machine().context()
    }

    fn blockstore(&self) -> &<Self::Machine as Machine>::Blockstore {
        self.machine().blockstore()
    }

    fn externs(&self) -> &<Self::Machine as Machine>::Externs {
        self.machine().externs()
    }

    fn state_tree(&self) -> &StateTree<<Self::Machine as Machine>::Blockstore> {
        self.machine().state_tree()
    }

    fn state_tree_mut(&mut self) -> &mut StateTree<<Self::Machine as Machine>::Blockstore> {
        self.machine_mut().state_tree_mut()
    }

    /// Charge against the message's gas limit.
    fn charge_gas(&mut self, charge: GasCharge) -> Result<()> {
        self.gas_tracker_mut().charge_gas(charge)
    }
}

/// How a dispatched invocation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationResult {
    pub exit_code: ExitCode,
    /// The return value. Empty when the callee aborted.
    pub value: RawBytes,
}

impl Default for InvocationResult {
    fn default() -> Self {
        Self {
            value: RawBytes::default(),
            exit_code: ExitCode::OK,
        }
    }
}

/// What's left of a call stack once it is torn down.
pub struct FinishRet {
    pub gas_used: Gas,
    pub backtrace: Backtrace,
}

// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use anyhow::{anyhow, Context as _};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use log::debug;

use super::{Machine, MachineContext};
use crate::engine::Engine;
use crate::externs::Externs;
use crate::kernel::Result;
use crate::state_tree::StateTree;
use crate::syscall_error;

/// A machine over a state tree it owns. Messages applied to it accumulate in the tree until
/// [`Machine::flush`].
pub struct DefaultMachine<B, E> {
    /// Fixed for the epoch; `circ_supply` is filled in at construction.
    context: MachineContext,
    engine: Engine,
    externs: E,
    state_tree: StateTree<B>,
}

impl<B, E> DefaultMachine<B, E>
where
    B: Blockstore + 'static,
    E: Externs + 'static,
{
    /// Load the state at `context.initial_state_root` out of `blockstore` and compute the
    /// epoch's circulating supply from it. Actor code comes from `engine`; randomness and past
    /// state roots come from `externs`.
    pub fn new(
        context: &MachineContext,
        engine: Engine,
        blockstore: B,
        externs: E,
    ) -> anyhow::Result<Self> {
        debug!(
            "initializing a new machine, epoch={}, base_fee={}, root={}",
            context.epoch, &context.base_fee, context.initial_state_root
        );

        let root = &context.initial_state_root;
        if !blockstore.has(root).context("failed to load initial state-root")? {
            return Err(anyhow!("state root {} is not in the blockstore", root));
        }

        let state_tree = StateTree::new_from_root(blockstore, &context.initial_state_root)?;

        let mut context = context.clone();
        context.circ_supply = context
            .supply
            .circulating_supply(context.epoch, &state_tree)
            .context("failed to compute circulating supply")?;

        Ok(DefaultMachine {
            context,
            engine,
            externs,
            state_tree,
        })
    }
}

impl<B, E> Machine for DefaultMachine<B, E>
where
    B: Blockstore + 'static,
    E: Externs + 'static,
{
    type Blockstore = B;
    type Externs = E;

    fn engine(&self) -> &Engine {
        &self.engine
    }

    fn blockstore(&self) -> &Self::Blockstore {
        self.state_tree.store()
    }

    fn context(&self) -> &MachineContext {
        &self.context
    }

    fn externs(&self) -> &Self::Externs {
        &self.externs
    }

    fn state_tree(&self) -> &StateTree<Self::Blockstore> {
        &self.state_tree
    }

    fn state_tree_mut(&mut self) -> &mut StateTree<Self::Blockstore> {
        &mut self.state_tree
    }

    fn flush(&mut self) -> Result<Cid> {
        self.state_tree.flush()
    }

    fn transfer(&mut self, from: ActorID, to: ActorID, value: &TokenAmount) -> Result<()> {
        if value.is_negative() {
            return Err(syscall_error!(IllegalArgument;
                "attempted to transfer negative transfer value {}", value)
            .into());
        }

        // A missing sender has no funds; NotFound is reserved for the recipient.
        let mut from_actor = self.state_tree.get_actor(from)?.ok_or_else(|| {
            syscall_error!(InsufficientFunds;
                "cannot transfer from non-existent sender {}", from)
        })?;

        if &from_actor.balance < value {
            return Err(syscall_error!(InsufficientFunds;
                "sender does not have funds to transfer (balance {}, transfer {})",
                &from_actor.balance, value)
            .into());
        }

        if from == to {
            debug!("self-transfer by {} is a no-op", from);
            return Ok(());
        }

        let mut to_actor = self.state_tree.get_actor(to)?.ok_or_else(|| {
            syscall_error!(NotFound; "transfer recipient {} does not exist in state-tree", to)
        })?;

        from_actor.deduct_funds(value)?;
        to_actor.deposit_funds(value);

        self.state_tree.set_actor(from, from_actor);
        self.state_tree.set_actor(to, to_actor);

        log::trace!("transferred {} from {} to {}", value, from, to);

        Ok(())
    }

    fn into_store(self) -> Self::Blockstore {
        self.state_tree.into_store()
    }
}

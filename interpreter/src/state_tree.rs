// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;

use anyhow::{anyhow, Context as _};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::CborStore;
use fvm_ipld_hamt::Hamt;
use fvm_shared::address::{Address, Payload};
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, HAMT_BIT_WIDTH};
use multihash_codetable::Code;

use crate::builtin::init::{State as InitActorState, INIT_ACTOR_ID};
use crate::history_map::HistoryMap;
use crate::kernel::{ClassifyResult, ExecutionError, Result};
use crate::syscall_error;

/// Version of the state root layout written by [`StateTree::flush`].
pub const STATE_TREE_VERSION: u64 = 1;

/// The on-chain state of a single actor.
#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct ActorState {
    /// Identifies the actor's behaviour in the [`Engine`](crate::engine::Engine).
    pub code: Cid,
    /// Root of the actor's own state object.
    pub state: Cid,
    /// Next expected message nonce. Only accounts send messages, so only they advance it.
    pub sequence: u64,
    pub balance: TokenAmount,
}

impl ActorState {
    pub fn new(code: Cid, state: Cid, balance: TokenAmount, sequence: u64) -> Self {
        Self {
            code,
            state,
            sequence,
            balance,
        }
    }

    /// Fails with `InsufficientFunds` rather than going negative.
    pub fn deduct_funds(&mut self, amt: &TokenAmount) -> Result<()> {
        if &self.balance < amt {
            return Err(syscall_error!(
                InsufficientFunds;
                "not enough funds: {} < {}",
                self.balance,
                amt
            )
            .into());
        }
        self.balance = &self.balance - amt;
        Ok(())
    }

    pub fn deposit_funds(&mut self, amt: &TokenAmount) {
        self.balance = &self.balance + amt;
    }
}

/// The root object of a flushed state tree.
#[derive(Debug, Serialize_tuple, Deserialize_tuple)]
pub struct StateRoot {
    pub version: u64,
    pub actors: Cid,
}

/// Actors keyed by ID in a HAMT, with every read and write going through an in-memory cache.
///
/// Writes stay in the cache until [`StateTree::flush`]. While a transaction is open the caches
/// record enough history to undo everything written since it began.
pub struct StateTree<S> {
    hamt: Hamt<S, ActorState>,

    actor_cache: RefCell<HistoryMap<ActorID, ActorCacheEntry>>,
    /// Addresses resolved through the init actor.
    resolve_cache: RefCell<HistoryMap<Address, ActorID>>,
    /// One per open transaction: how far to roll each cache back on revert.
    layers: Vec<StateSnapLayer>,
}

#[derive(Eq, PartialEq, Debug)]
struct ActorCacheEntry {
    /// Differs from the HAMT.
    dirty: bool,
    /// `None` for missing or deleted actors.
    actor: Option<ActorState>,
}

struct StateSnapLayer {
    actor_cache_height: usize,
    resolve_cache_height: usize,
}

impl<S> StateTree<S>
where
    S: Blockstore,
{
    pub fn new(store: S) -> Self {
        Self::with_hamt(Hamt::new_with_bit_width(store, HAMT_BIT_WIDTH))
    }

    /// Open the tree behind a [`StateRoot`] written by [`StateTree::flush`].
    pub fn new_from_root(store: S, c: &Cid) -> Result<Self> {
        let root: StateRoot = store
            .get_cbor(c)
            .with_context(|| format!("failed to load state tree {}", c))
            .or_fatal()?
            .ok_or_else(|| anyhow!("failed to find state tree {}", c))
            .or_fatal()?;

        if root.version != STATE_TREE_VERSION {
            return Err(ExecutionError::Fatal(anyhow!(
                "unsupported state tree version: {}",
                root.version
            )));
        }

        let hamt = Hamt::load_with_bit_width(&root.actors, store, HAMT_BIT_WIDTH)
            .context("failed to load state tree")
            .or_fatal()?;
        Ok(Self::with_hamt(hamt))
    }

    fn with_hamt(hamt: Hamt<S, ActorState>) -> Self {
        Self {
            hamt,
            actor_cache: Default::default(),
            resolve_cache: Default::default(),
            layers: Vec::new(),
        }
    }

    pub fn store(&self) -> &S {
        self.hamt.store()
    }

    pub fn get_actor(&self, id: ActorID) -> Result<Option<ActorState>> {
        self.actor_cache
            .borrow_mut()
            .get_or_try_insert_with(id, || {
                let key = Address::new_id(id).to_bytes();
                Ok(ActorCacheEntry {
                    dirty: false,
                    actor: self
                        .hamt
                        .get(&key)
                        .with_context(|| format!("failed to lookup actor {}", id))
                        .or_fatal()?
                        .cloned(),
                })
            })
            .map(|ActorCacheEntry { actor, .. }| actor.clone())
    }

    pub fn get_actor_by_address(&self, addr: &Address) -> Result<Option<ActorState>> {
        match self.lookup_id(addr)? {
            Some(id) => self.get_actor(id),
            None => Ok(None),
        }
    }

    pub fn set_actor(&mut self, id: ActorID, actor: ActorState) {
        self.actor_cache.get_mut().insert(
            id,
            ActorCacheEntry {
                actor: Some(actor),
                dirty: true,
            },
        )
    }

    /// Resolve `addr` to an ID. ID addresses resolve to themselves without a lookup; anything
    /// else goes through the init actor's address map.
    pub fn lookup_id(&self, addr: &Address) -> Result<Option<ActorID>> {
        if let &Payload::ID(id) = addr.payload() {
            return Ok(Some(id));
        }

        if let Some(&id) = self.resolve_cache.borrow().get(addr) {
            return Ok(Some(id));
        }

        let (state, _) = InitActorState::load(self)?;

        let id = match state.resolve_address(self.store(), addr)? {
            Some(id) => id,
            None => return Ok(None),
        };

        self.resolve_cache.borrow_mut().insert(*addr, id);

        Ok(Some(id))
    }

    pub fn delete_actor(&mut self, id: ActorID) {
        self.actor_cache.get_mut().insert(
            id,
            ActorCacheEntry {
                dirty: true,
                actor: None,
            },
        );
    }

    /// Like [`StateTree::maybe_mutate_actor_id`], but a missing actor is fatal.
    pub fn mutate_actor<F>(&mut self, id: ActorID, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ActorState) -> Result<()>,
    {
        self.maybe_mutate_actor_id(id, mutate).and_then(|found| {
            if found {
                Ok(())
            } else {
                Err(anyhow!("failed to lookup actor {}", id)).or_fatal()
            }
        })
    }

    /// Apply `mutate` to actor `id` and store the result. `Ok(false)` if there is no such actor.
    pub fn maybe_mutate_actor_id<F>(&mut self, id: ActorID, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut ActorState) -> Result<()>,
    {
        let mut act = match self.get_actor(id)? {
            Some(act) => act,
            None => return Ok(false),
        };

        mutate(&mut act)?;
        self.set_actor(id, act);
        Ok(true)
    }

    /// Assign the next free ID to `addr` in the init actor's address map.
    pub fn register_new_address(&mut self, addr: &Address) -> Result<ActorID> {
        let (mut state, mut actor) = InitActorState::load(self)?;

        let new_id = state.map_address_to_new_id(self.store(), addr)?;

        actor.state = self
            .store()
            .put_cbor(&state, Code::Blake2b256)
            .or_fatal()?;

        self.set_actor(INIT_ACTOR_ID, actor);
        self.resolve_cache.get_mut().insert(*addr, new_id);

        Ok(new_id)
    }

    /// Open a (possibly nested) transaction.
    pub fn begin_transaction(&mut self) {
        self.layers.push(StateSnapLayer {
            actor_cache_height: self.actor_cache.get_mut().history_len(),
            resolve_cache_height: self.resolve_cache.get_mut().history_len(),
        })
    }

    /// Close the innermost transaction, undoing its writes if `revert` is set.
    pub fn end_transaction(&mut self, revert: bool) -> Result<()> {
        let layer = self
            .layers
            .pop()
            .context("state snapshots empty")
            .or_fatal()?;
        if revert {
            self.actor_cache
                .get_mut()
                .rollback(layer.actor_cache_height);
            self.resolve_cache
                .get_mut()
                .rollback(layer.resolve_cache_height);
        }
        // Leaving the outermost transaction makes everything permanent.
        if !self.in_transaction() {
            self.actor_cache.get_mut().discard_history();
            self.resolve_cache.get_mut().discard_history();
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.layers.is_empty()
    }

    /// Write dirty actors into the HAMT and store a new [`StateRoot`]. Not allowed while a
    /// transaction is open.
    pub fn flush(&mut self) -> Result<Cid> {
        if self.in_transaction() {
            return Err(ExecutionError::Fatal(anyhow!(
                "state tree flushed with an open transaction",
            )));
        }
        for (&id, entry) in self.actor_cache.get_mut().iter_mut() {
            if !entry.dirty {
                continue;
            }
            entry.dirty = false;
            let key = Address::new_id(id).to_bytes();
            match entry.actor {
                None => {
                    self.hamt.delete(&key).or_fatal()?;
                }
                Some(ref state) => {
                    self.hamt.set(key.into(), state.clone()).or_fatal()?;
                }
            }
        }

        let actors = self.hamt.flush().or_fatal()?;
        self.store()
            .put_cbor(
                &StateRoot {
                    version: STATE_TREE_VERSION,
                    actors,
                },
                Code::Blake2b256,
            )
            .or_fatal()
    }

    pub fn into_store(self) -> S {
        self.hamt.into_store()
    }

    /// Visit every flushed actor.
    pub fn for_each<F>(&self, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(Address, &ActorState) -> anyhow::Result<()>,
    {
        self.hamt.for_each(|k, v| {
            let addr = Address::from_bytes(&k.0)?;
            f(addr, v)
        })?;
        Ok(())
    }
}

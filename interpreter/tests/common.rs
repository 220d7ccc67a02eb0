// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
#![allow(dead_code)]

use std::collections::HashMap;

use cid::multihash::Multihash;
use cid::Cid;
use fil_interpreter::actor_error::Abort;
use fil_interpreter::builtin::init::{ExecParams, INIT_ACTOR_ADDR};
use fil_interpreter::builtin::{
    self, account, cron, reward, ACCOUNT_ACTOR_CODE_ID, BURNT_FUNDS_ACTOR_ID, CRON_ACTOR_CODE_ID,
    CRON_ACTOR_ID, REWARD_ACTOR_CODE_ID, REWARD_ACTOR_ID, SYSTEM_ACTOR_CODE_ID, SYSTEM_ACTOR_ID,
};
use fil_interpreter::call_manager::DefaultCallManager;
use fil_interpreter::circ_supply::CircSupplyCalculator;
use fil_interpreter::executor::{ApplyKind, ApplyRet, DefaultExecutor, Executor};
use fil_interpreter::externs::ChainView;
use fil_interpreter::gas::{OverestimationPolicy, PriceList, PriceSchedules, GENESIS_PRICES};
use fil_interpreter::kernel::{ExecutionError, SyscallError};
use fil_interpreter::machine::{DefaultMachine, Machine, NetworkConfig};
use fil_interpreter::rand::{ChainRand, DomainSeparationTag};
use fil_interpreter::runtime::{serialize_return, Runtime, RuntimeExt};
use fil_interpreter::state_tree::{ActorState, StateTree};
use fil_interpreter::{actor_error, ActorCode, DefaultKernel, Engine, EMPTY_ARR_CID};
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{to_vec, CborStore, RawBytes};
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::{ErrorNumber, ExitCode};
use fvm_shared::message::Message;
use fvm_shared::{ActorID, MethodNum, IDENTITY_HASH, IPLD_RAW, METHOD_CONSTRUCTOR};
use lazy_static::lazy_static;
use multihash_codetable::Code;
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive, Zero};

pub type TestMachine = DefaultMachine<MemoryBlockstore, ChainRand<FixtureChain>>;
pub type TestKernel = DefaultKernel<DefaultCallManager<TestMachine>>;
pub type TestExecutor = DefaultExecutor<TestKernel>;

pub const NETWORK_NAME: &str = "testnet";

lazy_static! {
    pub static ref SCRIPTED_CODE_ID: Cid = Cid::new_v1(
        IPLD_RAW,
        Multihash::<64>::wrap(IDENTITY_HASH, b"test/scripted").unwrap()
    );
}

/// A chain of tickets and beacon entries derived from the epoch alone.
#[derive(Clone, Debug, Default)]
pub struct FixtureChain {
    pub head: ChainEpoch,
    pub roots: HashMap<ChainEpoch, Cid>,
}

impl FixtureChain {
    pub fn new(head: ChainEpoch) -> Self {
        Self {
            head,
            roots: HashMap::new(),
        }
    }

    /// Beacon entries are only produced every other epoch.
    pub fn beacon_epoch(epoch: ChainEpoch) -> ChainEpoch {
        epoch - epoch % 2
    }
}

impl ChainView for FixtureChain {
    fn head_epoch(&self) -> ChainEpoch {
        self.head
    }

    fn ticket(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Vec<u8>>> {
        if epoch > self.head {
            return Ok(None);
        }
        Ok(Some(format!("ticket-{}", epoch).into_bytes()))
    }

    fn beacon(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Vec<u8>>> {
        if epoch > self.head {
            return Ok(None);
        }
        Ok(Some(
            format!("beacon-{}", Self::beacon_epoch(epoch)).into_bytes(),
        ))
    }

    fn state_root(&self, epoch: ChainEpoch) -> anyhow::Result<Option<Cid>> {
        Ok(self.roots.get(&epoch).copied())
    }
}

/// A funded account in the genesis state.
#[derive(Clone, Copy, Debug)]
pub struct Account {
    pub id: ActorID,
    pub key: Address,
}

impl Account {
    pub fn id_addr(&self) -> Address {
        Address::new_id(self.id)
    }
}

/// Builds a genesis state tree with the system, init, reward, cron and burnt-funds actors.
pub struct GenesisBuilder {
    tree: StateTree<MemoryBlockstore>,
    next_key: u8,
}

impl GenesisBuilder {
    pub fn new() -> Self {
        let store = MemoryBlockstore::default();
        // Fresh actors point at the empty array until constructed.
        let empty = store.put_cbor(&[(); 0], Code::Blake2b256).unwrap();
        assert_eq!(empty, *EMPTY_ARR_CID);

        let mut tree = StateTree::new(store);
        builtin::init::State::install(&mut tree, NETWORK_NAME).unwrap();

        let mut builder = Self { tree, next_key: 1 };
        builder.actor(
            SYSTEM_ACTOR_ID,
            *SYSTEM_ACTOR_CODE_ID,
            *EMPTY_ARR_CID,
            TokenAmount::zero(),
        );
        let reward_state = builder.put(&reward::State::default());
        builder.actor(
            REWARD_ACTOR_ID,
            *REWARD_ACTOR_CODE_ID,
            reward_state,
            TokenAmount::zero(),
        );
        let cron_state = builder.put(&cron::State::default());
        builder.actor(
            CRON_ACTOR_ID,
            *CRON_ACTOR_CODE_ID,
            cron_state,
            TokenAmount::zero(),
        );
        let burnt_state = builder.put(&account::State {
            address: Address::new_id(BURNT_FUNDS_ACTOR_ID),
        });
        builder.actor(
            BURNT_FUNDS_ACTOR_ID,
            *ACCOUNT_ACTOR_CODE_ID,
            burnt_state,
            TokenAmount::zero(),
        );
        builder
    }

    pub fn put<T: serde::Serialize>(&mut self, obj: &T) -> Cid {
        self.tree
            .store()
            .put_cbor(obj, Code::Blake2b256)
            .unwrap()
    }

    pub fn actor(&mut self, id: ActorID, code: Cid, state: Cid, balance: TokenAmount) {
        self.tree
            .set_actor(id, ActorState::new(code, state, balance, 0));
    }

    pub fn set_mined(&mut self, total_mined: TokenAmount) {
        let state = self.put(&reward::State { total_mined });
        self.tree
            .mutate_actor(REWARD_ACTOR_ID, |act| {
                act.state = state;
                Ok(())
            })
            .unwrap();
    }

    pub fn set_cron_entries(&mut self, entries: Vec<cron::Entry>) {
        let state = self.put(&cron::State { entries });
        self.tree
            .mutate_actor(CRON_ACTOR_ID, |act| {
                act.state = state;
                Ok(())
            })
            .unwrap();
    }

    pub fn set_balance(&mut self, id: ActorID, balance: TokenAmount) {
        self.tree
            .mutate_actor(id, |act| {
                act.balance = balance;
                Ok(())
            })
            .unwrap();
    }

    /// A fresh secp256k1 key, unknown to the state tree.
    pub fn new_key(&mut self) -> Address {
        let key = Address::new_secp256k1(&[self.next_key; 65]).unwrap();
        self.next_key += 1;
        key
    }

    /// Adds an account actor keyed by a fresh secp256k1 address.
    pub fn account(&mut self, balance: TokenAmount, nonce: u64) -> Account {
        let key = self.new_key();
        let id = self.tree.register_new_address(&key).unwrap();
        let state = self.put(&account::State { address: key });
        self.tree.set_actor(
            id,
            ActorState::new(*ACCOUNT_ACTOR_CODE_ID, state, balance, nonce),
        );
        Account { id, key }
    }

    /// Adds a constructed scripted actor.
    pub fn scripted(&mut self, balance: TokenAmount) -> ActorID {
        let addr = Address::new_actor(&[self.next_key]);
        self.next_key += 1;
        let id = self.tree.register_new_address(&addr).unwrap();
        let state = self.put(&ScriptedState::default());
        self.actor(id, *SCRIPTED_CODE_ID, state, balance);
        id
    }

    pub fn build(mut self) -> (MemoryBlockstore, Cid) {
        let root = self.tree.flush().unwrap();
        (self.tree.into_store(), root)
    }
}

/// Knobs for the machine the tests run on.
#[derive(Clone, Debug)]
pub struct Options {
    pub epoch: ChainEpoch,
    pub base_fee: TokenAmount,
    pub prices: PriceList,
    pub overestimation: OverestimationPolicy,
    pub max_call_depth: u32,
    pub supply: CircSupplyCalculator,
    pub chain: FixtureChain,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            epoch: 100,
            base_fee: TokenAmount::from_atto(100),
            prices: GENESIS_PRICES,
            overestimation: OverestimationPolicy::FILECOIN,
            max_call_depth: 1024,
            supply: CircSupplyCalculator::minted_only(),
            chain: FixtureChain::new(100),
        }
    }
}

/// An engine with the built-in actors and the scripted actor.
pub fn engine() -> Engine {
    let mut engine = Engine::with_builtin_actors();
    engine.register(*SCRIPTED_CODE_ID, Scripted);
    engine
}

pub fn machine(store: MemoryBlockstore, root: Cid, opts: &Options) -> TestMachine {
    let mut nc = NetworkConfig::new(NETWORK_NAME);
    nc.with_max_call_depth(opts.max_call_depth)
        .with_overestimation(opts.overestimation)
        .with_price_schedules(PriceSchedules::constant(opts.prices.clone()))
        .with_supply(opts.supply.clone());
    let ctx = nc.for_epoch(opts.epoch, opts.base_fee.clone(), root);
    DefaultMachine::new(&ctx, engine(), store, ChainRand::new(opts.chain.clone())).unwrap()
}

pub fn executor(store: MemoryBlockstore, root: Cid, opts: &Options) -> TestExecutor {
    DefaultExecutor::new(machine(store, root, opts))
}

/// A message with a generous gas limit and a fee cap equal to the default base fee.
pub fn message(
    from: Address,
    to: Address,
    sequence: u64,
    value: TokenAmount,
    method_num: MethodNum,
    params: RawBytes,
) -> Message {
    Message {
        version: 0,
        from,
        to,
        sequence,
        value,
        method_num,
        params,
        gas_limit: 10_000_000,
        gas_fee_cap: TokenAmount::from_atto(100),
        gas_premium: TokenAmount::from_atto(1),
    }
}

pub fn apply<E: Executor>(executor: &mut E, msg: Message) -> ApplyRet {
    let raw_length = to_vec(&msg).unwrap().len();
    executor
        .execute_message(msg, ApplyKind::Explicit, raw_length)
        .unwrap()
}

pub fn apply_implicit<E: Executor>(executor: &mut E, msg: Message) -> ApplyRet {
    let raw_length = to_vec(&msg).unwrap().len();
    executor
        .execute_message(msg, ApplyKind::Implicit, raw_length)
        .unwrap()
}

pub fn actor(executor: &TestExecutor, id: ActorID) -> Option<ActorState> {
    executor.state_tree().get_actor(id).unwrap()
}

pub fn balance(executor: &TestExecutor, id: ActorID) -> TokenAmount {
    actor(executor, id).map(|a| a.balance).unwrap_or_default()
}

pub fn stored_value(executor: &TestExecutor, id: ActorID) -> u64 {
    let act = actor(executor, id).unwrap();
    let st: ScriptedState = executor
        .blockstore()
        .get_cbor(&act.state)
        .unwrap()
        .unwrap();
    st.value
}

/// Flushes and sums the balances of every actor in the tree.
pub fn total_balance(executor: &mut TestExecutor) -> TokenAmount {
    executor.flush().unwrap();
    let mut total = TokenAmount::zero();
    executor
        .state_tree()
        .for_each(|_, act| {
            total = &total + &act.balance;
            Ok(())
        })
        .unwrap();
    total
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptedState {
    pub value: u64,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone)]
pub struct ForwardParams {
    /// Stored in the caller's state before sending.
    pub store: u64,
    pub to: Address,
    pub method: MethodNum,
    pub params: RawBytes,
    pub value: TokenAmount,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, PartialEq, Eq)]
pub struct ForwardReturn {
    pub exit_code: u32,
    pub value: RawBytes,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone)]
pub struct RandomnessParams {
    pub beacon: bool,
    pub tag: i64,
    pub epoch: ChainEpoch,
    pub entropy: RawBytes,
}

#[derive(FromPrimitive, Clone, Copy, Debug)]
#[repr(u64)]
pub enum ScriptedMethod {
    Constructor = METHOD_CONSTRUCTOR,
    Store = 2,
    Abort = 3,
    Forward = 4,
    Recurse = 5,
    Randomness = 6,
    CreateChild = 7,
    SelfDestruct = 8,
    Panic = 9,
    BurnGas = 10,
    CircSupply = 11,
    Hash = 12,
    Echo = 13,
}

impl ScriptedMethod {
    pub fn num(self) -> MethodNum {
        self as MethodNum
    }
}

/// An actor that exercises the runtime on request.
pub struct Scripted;

impl Scripted {
    fn store(rt: &mut dyn Runtime, value: u64) -> Result<(), Abort> {
        rt.transaction(|st: &mut ScriptedState, _| {
            st.value = value;
            Ok(())
        })
    }

    fn forward(rt: &mut dyn Runtime, params: ForwardParams) -> Result<ForwardReturn, Abort> {
        Self::store(rt, params.store)?;
        let ret = rt.send(&params.to, params.method, &params.params, &params.value)?;
        Ok(ForwardReturn {
            exit_code: ret.exit_code.value(),
            value: ret.value,
        })
    }

    /// Recurses into itself `depth` times, returning how many nested levels were reached.
    fn recurse(rt: &mut dyn Runtime, depth: u32) -> Result<u32, Abort> {
        if depth == 0 {
            return Ok(0);
        }
        let me = Address::new_id(rt.msg_receiver());
        let params = RawBytes::serialize(depth - 1)?;
        match rt.send(&me, ScriptedMethod::Recurse.num(), &params, &TokenAmount::zero()) {
            Ok(ret) if ret.exit_code.is_success() => {
                let levels: u32 = ret.value.deserialize()?;
                Ok(levels + 1)
            }
            Ok(ret) => rt.abort(ret.exit_code, "nested recursion failed"),
            Err(ExecutionError::Syscall(SyscallError(_, ErrorNumber::LimitExceeded))) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn randomness(rt: &mut dyn Runtime, params: RandomnessParams) -> Result<RawBytes, Abort> {
        let tag = DomainSeparationTag::from_i64(params.tag)
            .ok_or_else(|| actor_error!(illegal_argument; "bad tag {}", params.tag))?;
        let r = if params.beacon {
            rt.get_randomness_from_beacon(tag, params.epoch, params.entropy.bytes())?
        } else {
            rt.get_randomness_from_tickets(tag, params.epoch, params.entropy.bytes())?
        };
        Ok(RawBytes::new(r.to_vec()))
    }

    fn create_child(rt: &mut dyn Runtime) -> Result<RawBytes, Abort> {
        let params = RawBytes::serialize(ExecParams {
            code_cid: *SCRIPTED_CODE_ID,
            constructor_params: RawBytes::default(),
        })?;
        let ret = rt.send(
            &INIT_ACTOR_ADDR,
            builtin::init::Method::Exec as MethodNum,
            &params,
            &TokenAmount::zero(),
        )?;
        if !ret.exit_code.is_success() {
            return rt.abort(ret.exit_code, "exec failed");
        }
        Ok(ret.value)
    }
}

impl ActorCode for Scripted {
    fn invoke_method(
        &self,
        rt: &mut dyn Runtime,
        method: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, Abort> {
        match FromPrimitive::from_u64(method) {
            Some(ScriptedMethod::Constructor) => {
                rt.create(&ScriptedState::default())?;
                Ok(RawBytes::default())
            }
            Some(ScriptedMethod::Store) => {
                let value = rt.deserialize_params(params)?;
                Self::store(rt, value)?;
                Ok(RawBytes::default())
            }
            Some(ScriptedMethod::Abort) => {
                let code: u32 = rt.deserialize_params(params)?;
                rt.abort(ExitCode::new(code), "scripted abort")
            }
            Some(ScriptedMethod::Forward) => {
                let params = rt.deserialize_params(params)?;
                serialize_return(&Self::forward(rt, params)?)
            }
            Some(ScriptedMethod::Recurse) => {
                let depth = rt.deserialize_params(params)?;
                serialize_return(&Self::recurse(rt, depth)?)
            }
            Some(ScriptedMethod::Randomness) => {
                let params = rt.deserialize_params(params)?;
                serialize_return(&Self::randomness(rt, params)?)
            }
            Some(ScriptedMethod::CreateChild) => Self::create_child(rt),
            Some(ScriptedMethod::SelfDestruct) => {
                let beneficiary: Address = rt.deserialize_params(params)?;
                rt.self_destruct(&beneficiary)?;
                Ok(RawBytes::default())
            }
            Some(ScriptedMethod::Panic) => panic!("scripted actor panicked"),
            Some(ScriptedMethod::BurnGas) => {
                let amount = rt.deserialize_params(params)?;
                Self::store(rt, 1)?;
                rt.charge_gas("burn", amount)?;
                Ok(RawBytes::default())
            }
            Some(ScriptedMethod::CircSupply) => serialize_return(&rt.total_fil_circ_supply()?),
            Some(ScriptedMethod::Hash) => {
                let digest = rt.hash_blake2b(params.bytes())?;
                Ok(RawBytes::new(digest.to_vec()))
            }
            Some(ScriptedMethod::Echo) => Ok(params.clone()),
            None => Err(actor_error!(unhandled_message; "invalid method: {}", method).into()),
        }
    }
}

// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Message application: validation, execution and gas settlement.

mod default;
mod threaded;

use std::collections::HashSet;
use std::fmt::Display;

use anyhow::{anyhow, Context as _};
use cid::Cid;
pub use default::DefaultExecutor;
use fvm_ipld_encoding::{to_vec, RawBytes, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::message::Message;
use fvm_shared::receipt::Receipt;
use multihash_codetable::{Code, MultihashDigest};
use num_traits::Zero;
pub use threaded::ThreadedExecutor;

use crate::builtin::cron::{self, CRON_ACTOR_ADDR};
use crate::builtin::reward::{self, AwardBlockRewardParams, REWARD_ACTOR_ADDR};
use crate::builtin::SYSTEM_ACTOR_ID;
use crate::call_manager::Backtrace;
use crate::gas::Gas;
use crate::Kernel;

/// Gas limit of the reward and cron messages the executor generates itself.
pub const IMPLICIT_MESSAGE_GAS_LIMIT: Gas = 1 << 30;

/// Applies chain messages to a machine, one at a time.
///
/// For every message the executor checks that the sender may send it and can pay for it, escrows
/// the maximum gas cost, dispatches the call, and settles the escrow between the burnt-funds
/// actor, the block producer and the sender.
pub trait Executor {
    /// The kernel actors run on. It fixes the call manager and, through it, the machine.
    type Kernel: Kernel;

    /// Apply `msg` and produce exactly one [`ApplyRet`].
    ///
    /// `raw_length` is the size of the message as included on chain; inclusion gas is priced on
    /// it. Invalid messages are reported in the returned receipt. An `Err` means the machine
    /// itself could not make progress.
    fn execute_message(
        &mut self,
        msg: Message,
        apply_kind: ApplyKind,
        raw_length: usize,
    ) -> anyhow::Result<ApplyRet>;

    /// Write all pending state to the blockstore and return the new state root.
    fn flush(&mut self) -> anyhow::Result<Cid>;

    /// Apply the messages of every block in a tipset, in order, and return one receipt per
    /// distinct message.
    ///
    /// A message included by more than one block is applied only the first time. After each
    /// block the reward actor pays the block's producer its reward plus the tips of the messages
    /// applied for that block, less their penalties. The tipset ends with one cron tick. A failed
    /// reward or cron message is an error.
    fn apply_block_messages(&mut self, blocks: &[BlockMessages]) -> anyhow::Result<Vec<Receipt>> {
        let mut receipts = Vec::new();
        let mut processed = HashSet::new();

        for block in blocks {
            let mut penalty = TokenAmount::zero();
            let mut gas_reward = TokenAmount::zero();

            for msg in &block.messages {
                if !processed.insert(msg.cid()?) {
                    continue;
                }
                let ret =
                    self.execute_message(msg.message.clone(), ApplyKind::Explicit, msg.raw_length)?;
                penalty = &penalty + &ret.penalty;
                gas_reward = &gas_reward + &ret.miner_tip;
                receipts.push(ret.msg_receipt);
            }

            let params = RawBytes::serialize(AwardBlockRewardParams {
                miner: block.miner,
                reward: block.reward.clone(),
                gas_reward,
                penalty,
            })?;
            let rew_msg = implicit_message(
                REWARD_ACTOR_ADDR,
                reward::Method::AwardBlockReward as u64,
                params,
            );
            let ret = apply_implicit(self, rew_msg)?;
            if !ret.msg_receipt.exit_code.is_success() {
                return Err(anyhow!(
                    "failed to apply reward message for miner {}: exit code {}",
                    block.miner,
                    ret.msg_receipt.exit_code.value()
                ));
            }
        }

        let cron_msg = implicit_message(
            CRON_ACTOR_ADDR,
            cron::Method::EpochTick as u64,
            RawBytes::default(),
        );
        let ret = apply_implicit(self, cron_msg)?;
        if !ret.msg_receipt.exit_code.is_success() {
            return Err(anyhow!(
                "failed to apply block cron message: exit code {}",
                ret.msg_receipt.exit_code.value()
            ));
        }

        Ok(receipts)
    }
}

/// A message as included in a block.
#[derive(Clone, Debug)]
pub struct BlockMessage {
    pub message: Message,
    /// Size of the message as included on chain, signature and all.
    pub raw_length: usize,
}

impl BlockMessage {
    /// A message included without a signature.
    pub fn unsigned(message: Message) -> anyhow::Result<Self> {
        let raw_length = to_vec(&message)?.len();
        Ok(Self {
            message,
            raw_length,
        })
    }

    /// Identifies the message across blocks.
    pub fn cid(&self) -> anyhow::Result<Cid> {
        let data = to_vec(&self.message).context("failed to encode message")?;
        Ok(Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&data)))
    }
}

/// The messages of one block in a tipset and what its producer earns for it.
#[derive(Clone, Debug)]
pub struct BlockMessages {
    pub miner: Address,
    /// Block reward paid out of the reward actor, before tips and penalties.
    pub reward: TokenAmount,
    pub messages: Vec<BlockMessage>,
}

fn apply_implicit<E: Executor + ?Sized>(executor: &mut E, msg: Message) -> anyhow::Result<ApplyRet> {
    let raw_length = to_vec(&msg)?.len();
    executor.execute_message(msg, ApplyKind::Implicit, raw_length)
}

/// Implicit messages ignore the nonce and pay no gas.
fn implicit_message(to: Address, method_num: u64, params: RawBytes) -> Message {
    Message {
        version: 0,
        from: Address::new_id(SYSTEM_ACTOR_ID),
        to,
        sequence: 0,
        value: TokenAmount::zero(),
        method_num,
        params,
        gas_limit: IMPLICIT_MESSAGE_GAS_LIMIT as u64,
        gas_fee_cap: TokenAmount::zero(),
        gas_premium: TokenAmount::zero(),
    }
}

/// Why a message did not succeed.
#[derive(Debug, Clone)]
pub enum ApplyFailure {
    /// Execution started but failed; the frames record where.
    MessageBacktrace(Backtrace),
    /// The message was rejected before execution.
    PreValidation(String),
}

impl Display for ApplyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyFailure::MessageBacktrace(bt) => {
                writeln!(f, "message failed with backtrace:")?;
                write!(f, "{}", bt)?;
            }
            ApplyFailure::PreValidation(msg) => {
                writeln!(f, "pre-validation failed: {}", msg)?;
            }
        }
        Ok(())
    }
}

/// The outcome of applying one message.
#[derive(Clone, Debug)]
pub struct ApplyRet {
    /// The on-chain part of the outcome.
    pub msg_receipt: Receipt,
    /// Charged to the block producer for including a message that could not be applied, or that
    /// set a fee cap below the base fee.
    pub penalty: TokenAmount,
    /// Paid to the block producer.
    pub miner_tip: TokenAmount,

    pub base_fee_burn: TokenAmount,
    pub over_estimation_burn: TokenAmount,
    /// Returned to the sender out of the escrow.
    pub refund: TokenAmount,
    pub gas_refund: Gas,
    pub gas_burned: Gas,

    pub failure_info: Option<ApplyFailure>,
}

impl ApplyRet {
    /// A message rejected before execution: no gas used, nothing moved.
    #[inline]
    pub fn prevalidation_fail(
        code: ExitCode,
        message: impl Into<String>,
        miner_penalty: TokenAmount,
    ) -> ApplyRet {
        ApplyRet {
            msg_receipt: Receipt {
                exit_code: code,
                return_data: RawBytes::default(),
                gas_used: 0,
                events_root: None,
            },
            penalty: miner_penalty,
            miner_tip: TokenAmount::zero(),
            base_fee_burn: TokenAmount::zero(),
            over_estimation_burn: TokenAmount::zero(),
            refund: TokenAmount::zero(),
            gas_refund: 0,
            gas_burned: 0,
            failure_info: Some(ApplyFailure::PreValidation(message.into())),
        }
    }
}

/// Where a message comes from.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum ApplyKind {
    /// Signed by an account, which pays for gas and must present the next nonce.
    Explicit,
    /// Generated by the node (e.g. block rewards). Any actor may send one; the nonce is ignored
    /// and gas is metered but not paid for.
    Implicit,
}

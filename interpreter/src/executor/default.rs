// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use std::ops::{Deref, DerefMut};
use std::result::Result as StdResult;

use anyhow::{anyhow, Result};
use cid::Cid;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::{ErrorNumber, ExitCode};
use fvm_shared::message::Message;
use fvm_shared::receipt::Receipt;
use fvm_shared::ActorID;
use num_traits::Zero;

use super::{ApplyFailure, ApplyKind, ApplyRet, Executor};
use crate::builtin::{self, BURNT_FUNDS_ACTOR_ID, REWARD_ACTOR_ID};
use crate::call_manager::backtrace::Cause;
use crate::call_manager::{Backtrace, CallManager, FinishRet, InvocationResult};
use crate::gas::{Gas, GasCharge, GasOutputs};
use crate::kernel::{Context as _, ExecutionError, Kernel};
use crate::machine::Machine;

/// Runs messages on the calling thread.
///
/// Deep call chains recurse on the host stack. Callers without a large stack should go through
/// [`ThreadedExecutor`][super::ThreadedExecutor].
pub struct DefaultExecutor<K: Kernel> {
    // `None` after a panic while the machine was lent out.
    machine: Option<<K::CallManager as CallManager>::Machine>,
}

impl<K: Kernel> Deref for DefaultExecutor<K> {
    type Target = <K::CallManager as CallManager>::Machine;

    fn deref(&self) -> &Self::Target {
        self.machine.as_ref().expect("machine poisoned")
    }
}

impl<K: Kernel> DerefMut for DefaultExecutor<K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.machine.as_mut().expect("machine poisoned")
    }
}

/// What preflight hands to execution when a message passes validation.
struct Preflight {
    sender_id: ActorID,
    gas_limit: Gas,
    gas_cost: TokenAmount,
    inclusion_cost: GasCharge,
}

impl<K> Executor for DefaultExecutor<K>
where
    K: Kernel,
{
    type Kernel = K;

    fn execute_message(
        &mut self,
        msg: Message,
        apply_kind: ApplyKind,
        raw_length: usize,
    ) -> anyhow::Result<ApplyRet> {
        let Preflight {
            sender_id,
            gas_limit,
            gas_cost,
            inclusion_cost,
        } = match self.preflight_message(&msg, apply_kind, raw_length)? {
            Ok(res) => res,
            Err(apply_ret) => return Ok(apply_ret),
        };

        struct MachineExecRet {
            result: crate::kernel::Result<InvocationResult>,
            gas_used: Gas,
            backtrace: Backtrace,
        }

        let ret = self.map_machine(|machine| {
            let mut cm =
                K::CallManager::new(machine, gas_limit, sender_id, msg.from, msg.sequence);
            // Preflight already checked that the limit covers inclusion.
            if let Err(e) = cm.charge_gas(inclusion_cost) {
                let (_, machine) = cm.finish();
                return (Err(e), machine);
            }

            let result = cm.with_transaction(|cm| {
                cm.send::<K>(sender_id, msg.to, msg.method_num, &msg.params, &msg.value)
            });

            let (FinishRet { gas_used, backtrace }, machine) = cm.finish();

            (
                Ok(MachineExecRet {
                    result,
                    gas_used,
                    backtrace,
                }),
                machine,
            )
        })?;

        let MachineExecRet {
            result: res,
            gas_used,
            backtrace,
        } = ret;

        let (receipt, failure_info) = self.make_receipt(&msg, res, gas_used, gas_limit, backtrace);

        match apply_kind {
            ApplyKind::Explicit => {
                self.finish_message(sender_id, msg, receipt, failure_info, gas_cost)
            }
            ApplyKind::Implicit => Ok(ApplyRet {
                msg_receipt: receipt,
                penalty: TokenAmount::zero(),
                miner_tip: TokenAmount::zero(),
                base_fee_burn: TokenAmount::zero(),
                over_estimation_burn: TokenAmount::zero(),
                refund: TokenAmount::zero(),
                gas_refund: 0,
                gas_burned: 0,
                failure_info,
            }),
        }
    }

    fn flush(&mut self) -> anyhow::Result<Cid> {
        Ok((**self).flush()?)
    }
}

impl<K> DefaultExecutor<K>
where
    K: Kernel,
{
    pub fn new(machine: <K::CallManager as CallManager>::Machine) -> Self {
        Self {
            machine: Some(machine),
        }
    }

    /// Take the machine back. `None` if a panic left it behind mid-message.
    pub fn into_machine(self) -> Option<<K::CallManager as CallManager>::Machine> {
        self.machine
    }

    /// Checks the message against the sender's state and, if it may be applied, bumps the
    /// sender's nonce and escrows the maximum gas cost. A rejected message is returned as a
    /// ready-made [`ApplyRet`]; an outer error means the machine itself failed.
    fn preflight_message(
        &mut self,
        msg: &Message,
        apply_kind: ApplyKind,
        raw_length: usize,
    ) -> Result<StdResult<Preflight, ApplyRet>> {
        let base_fee = self.context().base_fee.clone();
        let block_gas_limit = self.context().block_gas_limit;

        // The miner is penalised for including a message that can't be applied.
        let penalty_for = |gas: Gas| &base_fee * gas;

        let gas_limit = match Gas::try_from(msg.gas_limit) {
            Ok(limit) if limit <= block_gas_limit => limit,
            _ => {
                return Ok(Err(ApplyRet::prevalidation_fail(
                    ExitCode::SYS_ASSERTION_FAILED,
                    format!(
                        "gas limit {} exceeds block gas limit {}",
                        msg.gas_limit, block_gas_limit
                    ),
                    TokenAmount::zero(),
                )));
            }
        };
        let miner_penalty_amount = penalty_for(gas_limit);

        if msg.value.is_negative()
            || msg.gas_fee_cap.is_negative()
            || msg.gas_premium.is_negative()
        {
            return Ok(Err(ApplyRet::prevalidation_fail(
                ExitCode::SYS_ASSERTION_FAILED,
                format!(
                    "negative amount in message (value {}, fee cap {}, premium {})",
                    msg.value, msg.gas_fee_cap, msg.gas_premium
                ),
                miner_penalty_amount,
            )));
        }

        let inclusion_cost = match apply_kind {
            ApplyKind::Implicit => GasCharge::new("none", 0, 0),
            ApplyKind::Explicit => {
                let inclusion_cost = self.context().price_list.on_chain_message(raw_length);
                let inclusion_total = inclusion_cost.total();
                // Verify the cost of the message is not over the message gas limit.
                if inclusion_total > gas_limit {
                    return Ok(Err(ApplyRet::prevalidation_fail(
                        ExitCode::SYS_OUT_OF_GAS,
                        format!("Out of gas ({} > {})", inclusion_total, gas_limit),
                        penalty_for(inclusion_total),
                    )));
                }
                inclusion_cost
            }
        };

        let sender = match self
            .state_tree()
            .lookup_id(&msg.from)
            .with_context(|| format!("failed to lookup actor {}", &msg.from))?
        {
            Some(id) => self
                .state_tree()
                .get_actor(id)
                .with_context(|| format!("failed to lookup actor {}", &msg.from))?
                .map(|act| (id, act)),
            None => None,
        };
        let Some((sender_id, mut sender_state)) = sender else {
            return Ok(Err(ApplyRet::prevalidation_fail(
                ExitCode::SYS_SENDER_INVALID,
                "Sender invalid",
                miner_penalty_amount,
            )));
        };

        if apply_kind == ApplyKind::Implicit {
            return Ok(Ok(Preflight {
                sender_id,
                gas_limit,
                gas_cost: TokenAmount::zero(),
                inclusion_cost,
            }));
        }

        if !builtin::is_account_actor(&sender_state.code) {
            return Ok(Err(ApplyRet::prevalidation_fail(
                ExitCode::SYS_SENDER_INVALID,
                "Send not from account actor",
                miner_penalty_amount,
            )));
        };

        if msg.sequence != sender_state.sequence {
            return Ok(Err(ApplyRet::prevalidation_fail(
                ExitCode::SYS_SENDER_STATE_INVALID,
                format!(
                    "Actor sequence invalid: {} != {}",
                    msg.sequence, sender_state.sequence
                ),
                miner_penalty_amount,
            )));
        };

        // The whole gas limit is escrowed at the fee cap, on top of the value.
        let gas_cost: TokenAmount = &msg.gas_fee_cap * gas_limit;
        let required = &gas_cost + &msg.value;
        if sender_state.balance < required {
            return Ok(Err(ApplyRet::prevalidation_fail(
                ExitCode::SYS_INSUFFICIENT_FUNDS,
                format!(
                    "Actor balance less than needed: {} < {}",
                    sender_state.balance, required
                ),
                miner_penalty_amount,
            )));
        }

        sender_state.sequence += 1;
        sender_state.deduct_funds(&gas_cost)?;

        self.state_tree_mut().set_actor(sender_id, sender_state);

        Ok(Ok(Preflight {
            sender_id,
            gas_limit,
            gas_cost,
            inclusion_cost,
        }))
    }

    /// Settles the gas escrow: burns the base fee and the overestimation penalty, tips the miner
    /// and refunds the rest to the sender.
    fn finish_message(
        &mut self,
        sender_id: ActorID,
        msg: Message,
        receipt: Receipt,
        failure_info: Option<ApplyFailure>,
        gas_cost: TokenAmount,
    ) -> anyhow::Result<ApplyRet> {
        let policy = self.context().overestimation;
        let GasOutputs {
            base_fee_burn,
            over_estimation_burn,
            miner_penalty,
            miner_tip,
            refund,
            gas_refund,
            gas_burned,
        } = GasOutputs::compute(
            receipt.gas_used as Gas,
            msg.gas_limit as Gas,
            &self.context().base_fee,
            &msg.gas_fee_cap,
            &msg.gas_premium,
            &policy,
        );

        let mut transfer_to_actor = |addr: ActorID, amt: &TokenAmount| -> anyhow::Result<()> {
            if amt.is_negative() {
                return Err(anyhow!("attempted to transfer negative value into actor"));
            }
            if amt.is_zero() {
                return Ok(());
            }

            self.state_tree_mut()
                .mutate_actor(addr, |act| {
                    act.deposit_funds(amt);
                    Ok(())
                })
                .context("failed to lookup actor for transfer")?;
            Ok(())
        };

        transfer_to_actor(BURNT_FUNDS_ACTOR_ID, &base_fee_burn)?;
        transfer_to_actor(REWARD_ACTOR_ID, &miner_tip)?;
        transfer_to_actor(BURNT_FUNDS_ACTOR_ID, &over_estimation_burn)?;
        transfer_to_actor(sender_id, &refund)?;

        let settled = &base_fee_burn + &over_estimation_burn + &refund + &miner_tip;
        if settled != gas_cost {
            return Err(anyhow!(
                "gas settlement moved {} but {} was escrowed",
                settled,
                gas_cost
            ));
        }
        Ok(ApplyRet {
            msg_receipt: receipt,
            penalty: miner_penalty,
            miner_tip,
            base_fee_burn,
            over_estimation_burn,
            refund,
            gas_refund,
            gas_burned,
            failure_info,
        })
    }

    /// Turn the outcome of the top-level send into a receipt.
    ///
    /// A send that could not be dispatched maps onto a system exit code. Fatal errors consume the
    /// whole gas limit, so every node reports the same receipt for them.
    fn make_receipt(
        &self,
        msg: &Message,
        res: crate::kernel::Result<InvocationResult>,
        gas_used: Gas,
        gas_limit: Gas,
        mut backtrace: Backtrace,
    ) -> (Receipt, Option<ApplyFailure>) {
        let (exit_code, return_data, gas_used) = match res {
            Ok(InvocationResult { exit_code, value }) => (exit_code, value, gas_used),
            Err(ExecutionError::OutOfGas) => {
                (ExitCode::SYS_OUT_OF_GAS, Default::default(), gas_used)
            }
            Err(ExecutionError::Syscall(err)) => {
                let exit_code = match err.1 {
                    ErrorNumber::InsufficientFunds => ExitCode::SYS_INSUFFICIENT_FUNDS,
                    ErrorNumber::NotFound => ExitCode::SYS_INVALID_RECEIVER,
                    _ => ExitCode::SYS_ASSERTION_FAILED,
                };
                backtrace.begin(Cause::from_syscall("send", err));
                (exit_code, Default::default(), gas_used)
            }
            Err(ExecutionError::Fatal(err)) => {
                let err = err.context(format!(
                    "[from={}, to={}, seq={}, m={}, h={}]",
                    msg.from,
                    msg.to,
                    msg.sequence,
                    msg.method_num,
                    self.context().epoch,
                ));
                log::error!("fatal error while applying message: {:#}", err);
                // Frames collected on the way out stay; the error becomes their cause.
                backtrace.set_cause(Cause::from_fatal(err));
                (ExitCode::SYS_ASSERTION_FAILED, Default::default(), gas_limit)
            }
        };

        // Deletion refunds can leave the running total below zero.
        let gas_used = gas_used.max(0);

        let failure_info = if exit_code.is_success() || backtrace.is_empty() {
            None
        } else {
            Some(ApplyFailure::MessageBacktrace(backtrace))
        };
        let receipt = Receipt {
            exit_code,
            return_data,
            gas_used: gas_used as u64,
            events_root: None,
        };
        (receipt, failure_info)
    }

    fn map_machine<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce(
            <K::CallManager as CallManager>::Machine,
        ) -> (T, <K::CallManager as CallManager>::Machine),
    {
        replace_with::replace_with_and_return(
            &mut self.machine,
            || None,
            |m| {
                let (ret, machine) = f(m.expect("machine poisoned"));
                (ret, Some(machine))
            },
        )
    }
}

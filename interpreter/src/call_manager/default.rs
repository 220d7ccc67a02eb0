// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::anyhow;
use cid::Cid;
use derive_more::{Deref, DerefMut};
use fvm_ipld_encoding::{to_vec, RawBytes};
use fvm_shared::address::{Address, Payload};
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::{ActorID, MethodNum, METHOD_CONSTRUCTOR, METHOD_SEND};
use num_traits::Zero;

use super::backtrace::Frame;
use super::{Backtrace, CallManager, FinishRet, InvocationResult};
use crate::actor_error::Abort;
use crate::builtin::{ACCOUNT_ACTOR_CODE_ID, SYSTEM_ACTOR_ID};
use crate::gas::{Gas, GasTracker};
use crate::kernel::{ExecutionError, Kernel, Result};
use crate::machine::Machine;
use crate::state_tree::ActorState;
use crate::{syscall_error, EMPTY_ARR_CID};

/// Call manager for natively linked actors. Each nested send recurses on the host stack.
#[repr(transparent)]
pub struct DefaultCallManager<M: Machine>(Option<Box<InnerDefaultCallManager<M>>>);

#[doc(hidden)]
#[derive(Deref, DerefMut)]
pub struct InnerDefaultCallManager<M: Machine> {
    #[deref]
    #[deref_mut]
    machine: M,
    gas_tracker: GasTracker,
    origin: ActorID,
    /// Sender address exactly as written in the message; robust addresses are derived from it.
    origin_address: Address,
    nonce: u64,
    num_actors_created: u64,
    call_stack_depth: u32,
    backtrace: Backtrace,
}

#[doc(hidden)]
impl<M: Machine> std::ops::Deref for DefaultCallManager<M> {
    type Target = InnerDefaultCallManager<M>;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref().expect("call manager is poisoned")
    }
}

#[doc(hidden)]
impl<M: Machine> std::ops::DerefMut for DefaultCallManager<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut().expect("call manager is poisoned")
    }
}

impl<M> CallManager for DefaultCallManager<M>
where
    M: Machine,
{
    type Machine = M;

    fn new(
        machine: M,
        gas_limit: Gas,
        origin: ActorID,
        origin_address: Address,
        nonce: u64,
    ) -> Self {
        DefaultCallManager(Some(Box::new(InnerDefaultCallManager {
            machine,
            gas_tracker: GasTracker::new(gas_limit, 0),
            origin,
            origin_address,
            nonce,
            num_actors_created: 0,
            call_stack_depth: 0,
            backtrace: Backtrace::default(),
        })))
    }

    fn send<K>(
        &mut self,
        from: ActorID,
        to: Address,
        method: MethodNum,
        params: &RawBytes,
        value: &TokenAmount,
    ) -> Result<InvocationResult>
    where
        K: Kernel<CallManager = Self>,
    {
        self.with_stack_frame(|s| s.send_unchecked::<K>(from, to, method, params, value))
    }

    fn with_transaction(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<InvocationResult>,
    ) -> Result<InvocationResult> {
        self.state_tree_mut().begin_transaction();

        let (revert, res) = match f(self) {
            Ok(v) => (!v.exit_code.is_success(), Ok(v)),
            Err(e) => (true, Err(e)),
        };

        self.state_tree_mut().end_transaction(revert)?;

        res
    }

    fn finish(mut self) -> (FinishRet, Self::Machine) {
        let InnerDefaultCallManager {
            machine,
            backtrace,
            gas_tracker,
            ..
        } = *self.0.take().expect("call manager is poisoned");

        (
            FinishRet {
                gas_used: gas_tracker.gas_used(),
                backtrace,
            },
            machine,
        )
    }

    fn machine(&self) -> &Self::Machine {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut Self::Machine {
        &mut self.machine
    }

    fn gas_tracker(&self) -> &GasTracker {
        &self.gas_tracker
    }

    fn gas_tracker_mut(&mut self) -> &mut GasTracker {
        &mut self.gas_tracker
    }

    fn origin(&self) -> ActorID {
        self.origin
    }

    fn next_actor_address(&self) -> Address {
        // Base the next address on the address specified as the message origin. This lets us use,
        // e.g., an f2 address even if we can't look it up anywhere.
        let mut b = to_vec(&self.origin_address).expect("failed to serialize address");
        b.extend_from_slice(&self.nonce.to_be_bytes());
        b.extend_from_slice(&self.num_actors_created.to_be_bytes());
        Address::new_actor(&b)
    }

    fn create_actor(&mut self, code_id: Cid, actor_id: ActorID, state: Cid) -> Result<()> {
        if self.state_tree().get_actor(actor_id)?.is_some() {
            return Err(syscall_error!(Forbidden; "Actor address already exists").into());
        }

        self.charge_gas(self.price_list().on_create_actor())?;
        self.state_tree_mut().set_actor(
            actor_id,
            ActorState::new(code_id, state, TokenAmount::zero(), 0),
        );
        self.num_actors_created += 1;
        Ok(())
    }
}

impl<M> DefaultCallManager<M>
where
    M: Machine,
{
    /// Value sent to an unknown key address brings an account actor into being there. The
    /// account's constructor runs as a call from the system actor.
    fn create_account_actor_from_send<K>(&mut self, addr: &Address) -> Result<ActorID>
    where
        K: Kernel<CallManager = Self>,
    {
        self.charge_gas(self.price_list().on_create_actor())?;

        let id = self.state_tree_mut().register_new_address(addr)?;
        self.state_tree_mut().set_actor(
            id,
            ActorState::new(
                *ACCOUNT_ACTOR_CODE_ID,
                *EMPTY_ARR_CID,
                TokenAmount::zero(),
                0,
            ),
        );

        let params = RawBytes::serialize(addr).map_err(|e| {
            log::error!(
                "failed to serialize address when creating actor, ignoring: {}",
                e
            );
            syscall_error!(IllegalArgument; "failed to serialize params: {}", e)
        })?;

        let ret = self.send_resolved::<K>(
            SYSTEM_ACTOR_ID,
            id,
            METHOD_CONSTRUCTOR,
            &params,
            &TokenAmount::zero(),
        )?;
        if !ret.exit_code.is_success() {
            return Err(ExecutionError::Fatal(anyhow!(
                "failed to construct account actor for {}: {}",
                addr,
                ret.exit_code
            )));
        }

        Ok(id)
    }

    /// Resolve the receiver, creating an account for key addresses, and dispatch.
    fn send_unchecked<K>(
        &mut self,
        from: ActorID,
        to: Address,
        method: MethodNum,
        params: &RawBytes,
        value: &TokenAmount,
    ) -> Result<InvocationResult>
    where
        K: Kernel<CallManager = Self>,
    {
        let to = match self.state_tree().lookup_id(&to)? {
            Some(id) => id,
            None => match to.payload() {
                Payload::BLS(_) | Payload::Secp256k1(_) => {
                    self.create_account_actor_from_send::<K>(&to)?
                }
                _ => {
                    return Err(syscall_error!(NotFound;
                        "actor does not exist or cannot be created: {}", to)
                    .into())
                }
            },
        };

        self.send_resolved::<K>(from, to, method, params, value)
    }

    /// Charge, move `value`, then run `method` on actor `to` in a fresh kernel. A bare value
    /// transfer stops after the move.
    fn send_resolved<K>(
        &mut self,
        from: ActorID,
        to: ActorID,
        method: MethodNum,
        params: &RawBytes,
        value: &TokenAmount,
    ) -> Result<InvocationResult>
    where
        K: Kernel<CallManager = Self>,
    {
        let state = self
            .state_tree()
            .get_actor(to)?
            .ok_or_else(|| syscall_error!(NotFound; "actor does not exist: {}", to))?;

        self.charge_gas(self.price_list().on_method_invocation(value, method))?;

        if !value.is_zero() {
            self.machine.transfer(from, to, value)?;
        }

        if method == METHOD_SEND {
            log::trace!("sent {} -> {}: {}", from, to, &value);
            return Ok(InvocationResult::default());
        }

        let actor = self.engine().get(&state.code).ok_or_else(|| {
            ExecutionError::Fatal(anyhow!("no code for actor {} (code {})", to, state.code))
        })?;

        log::trace!("calling {} -> {}::{}", from, to, method);
        self.map_mut(|cm| {
            let mark = cm.backtrace.mark();
            let mut kernel = K::new(cm, from, to, method, value.clone());

            // Actors report failure by aborting; a panic is treated as a fatal abort.
            let result = catch_unwind(AssertUnwindSafe(|| {
                actor.invoke_method(&mut kernel, method, params)
            }))
            .unwrap_or_else(|panic| {
                Err(Abort::Fatal(anyhow!(
                    "panic within actor: {}",
                    panic_message(&panic)
                )))
            });

            let mut cm = kernel.into_inner();

            // Only the outermost return value ends up in the receipt, so only it is charged.
            let result = result.and_then(|ret| {
                if cm.call_stack_depth == 1 {
                    cm.charge_gas(cm.price_list().on_chain_return_value(ret.bytes().len()))?;
                }
                Ok(ret)
            });

            let ret = match result {
                Ok(value) => {
                    cm.backtrace.forget_since(mark);
                    Ok(InvocationResult {
                        exit_code: ExitCode::OK,
                        value,
                    })
                }
                Err(abort) => {
                    let (frame, res) = settle_abort(to, method, abort);
                    cm.backtrace.push_frame(frame);
                    res
                }
            };

            if log::log_enabled!(log::Level::Trace) {
                match &ret {
                    Ok(val) => log::trace!(
                        "returning {}::{} -> {} ({})",
                        to,
                        method,
                        from,
                        val.exit_code
                    ),
                    Err(e) => log::trace!("failing {}::{} -> {} (err:{})", to, method, from, e),
                }
            }

            (ret, cm)
        })
    }

    /// Move the call manager into the callee's kernel for the duration of `f`. The caller's
    /// kernel is left holding an empty shell until `f` hands it back.
    fn map_mut<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce(Self) -> (T, Self),
    {
        replace_with::replace_with_and_return(self, || DefaultCallManager(None), f)
    }

    /// Run `f` one frame deeper, refusing with `LimitExceeded` at the configured maximum depth.
    fn with_stack_frame<F, V>(&mut self, f: F) -> Result<V>
    where
        F: FnOnce(&mut Self) -> Result<V>,
    {
        if self.call_stack_depth >= self.machine.context().max_call_depth {
            return Err(
                syscall_error!(LimitExceeded; "message execution exceeds call depth").into(),
            );
        }

        self.call_stack_depth += 1;
        let res = f(self);
        self.call_stack_depth -= 1;
        res
    }
}

/// Turn an actor's abort into the frame recorded for it and the outcome seen by its caller.
/// Exit codes an actor may not use are replaced by `SYS_ILLEGAL_EXIT_CODE`; running out of gas and
/// fatal errors unwind the whole message.
fn settle_abort(
    source: ActorID,
    method: MethodNum,
    abort: Abort,
) -> (Frame, Result<InvocationResult>) {
    let exited = |code: ExitCode| -> Result<InvocationResult> {
        Ok(InvocationResult {
            exit_code: code,
            value: RawBytes::default(),
        })
    };
    let (code, message, res) = match abort {
        Abort::Exit(code, message) if code.is_success() || code.is_system_error() => (
            ExitCode::SYS_ILLEGAL_EXIT_CODE,
            format!("actor aborted with illegal exit code {}: {}", code, message),
            exited(ExitCode::SYS_ILLEGAL_EXIT_CODE),
        ),
        Abort::Exit(code, message) => (code, message, exited(code)),
        Abort::OutOfGas => (
            ExitCode::SYS_OUT_OF_GAS,
            "out of gas".to_owned(),
            Err(ExecutionError::OutOfGas),
        ),
        Abort::Fatal(err) => (
            ExitCode::SYS_ASSERTION_FAILED,
            "fatal error".to_owned(),
            Err(ExecutionError::Fatal(err)),
        ),
    };
    let frame = Frame {
        source,
        method,
        message,
        code,
    };
    (frame, res)
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

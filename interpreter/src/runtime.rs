// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The capability surface handed to native actor code.

use fvm_ipld_encoding::{from_slice, to_vec, RawBytes};
use fvm_shared::error::ExitCode;
use fvm_shared::ActorID;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::actor_error::Abort;
use crate::kernel::{
    ActorOps, CircSupplyOps, CryptoOps, GasOps, IpldOps, MessageOps, NetworkOps, RandomnessOps,
    SelfOps, SendOps,
};
use crate::{actor_error, EMPTY_ARR_CID};

/// Everything an actor may do while it executes. Every kernel is a runtime; actor code only ever
/// sees a `&mut dyn Runtime`.
pub trait Runtime:
    NetworkOps
    + MessageOps
    + SelfOps
    + IpldOps
    + ActorOps
    + SendOps
    + CircSupplyOps
    + GasOps
    + CryptoOps
    + RandomnessOps
{
}

impl<T> Runtime for T where
    T: NetworkOps
        + MessageOps
        + SelfOps
        + IpldOps
        + ActorOps
        + SendOps
        + CircSupplyOps
        + GasOps
        + CryptoOps
        + RandomnessOps
{
}

/// Typed helpers over [`Runtime`] for actor implementations.
pub trait RuntimeExt: Runtime {
    /// Load the actor's state object.
    fn state<S: DeserializeOwned>(&mut self) -> Result<S, Abort> {
        let root = self.root()?;
        let data = self.ipld_get(&root)?;
        from_slice(&data).map_err(|e| {
            actor_error!(illegal_state; "failed to decode actor state: {}", e).into()
        })
    }

    /// Store the actor's initial state. Fails if the state has already been constructed.
    fn create<S: Serialize>(&mut self, obj: &S) -> Result<(), Abort> {
        if self.root()? != *EMPTY_ARR_CID {
            return Err(actor_error!(
                illegal_state;
                "failed to create state; expected empty array CID"
            )
            .into());
        }
        self.replace_state(obj)
    }

    /// Overwrite the actor's state object.
    fn replace_state<S: Serialize>(&mut self, obj: &S) -> Result<(), Abort> {
        let root = self.ipld_put(&to_vec(obj)?)?;
        self.set_root(root)?;
        Ok(())
    }

    /// Load the state, let `f` mutate it, and store the result. Nothing is stored if `f` fails.
    fn transaction<S, RT, F>(&mut self, f: F) -> Result<RT, Abort>
    where
        S: Serialize + DeserializeOwned,
        F: FnOnce(&mut S, &mut Self) -> Result<RT, Abort>,
    {
        let mut st: S = self.state()?;
        let ret = f(&mut st, self)?;
        self.replace_state(&st)?;
        Ok(ret)
    }

    fn validate_immediate_caller_accept_any(&self) -> Result<(), Abort> {
        Ok(())
    }

    fn validate_immediate_caller_is(&self, allowed: &[ActorID]) -> Result<(), Abort> {
        let caller = self.msg_caller();
        if allowed.contains(&caller) {
            Ok(())
        } else {
            Err(actor_error!(forbidden; "caller {} is not one of {:?}", caller, allowed).into())
        }
    }

    fn deserialize_params<P: DeserializeOwned>(&self, params: &RawBytes) -> Result<P, Abort> {
        params.deserialize().map_err(|e| {
            actor_error!(serialization; "failed to decode parameters: {}", e).into()
        })
    }

    /// Abort the current invocation with the given exit code.
    fn abort<T>(&self, code: ExitCode, msg: impl Into<String>) -> Result<T, Abort> {
        Err(Abort::Exit(code, msg.into()))
    }
}

impl<R: Runtime + ?Sized> RuntimeExt for R {}

/// Encode a method's return value.
pub fn serialize_return<T: Serialize>(value: &T) -> Result<RawBytes, Abort> {
    Ok(RawBytes::serialize(value)?)
}

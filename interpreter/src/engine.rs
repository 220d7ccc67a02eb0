// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The actor code registry.

use std::collections::HashMap;
use std::sync::Arc;

use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::MethodNum;

use crate::actor_error::Abort;
use crate::builtin;
use crate::runtime::Runtime;

/// Native actor code.
///
/// Implementations dispatch on the method number, returning `USR_UNHANDLED_MESSAGE` for methods
/// they do not export. Actor code must be deterministic: everything it observes has to come
/// through the supplied [`Runtime`].
pub trait ActorCode: Send + Sync + 'static {
    fn invoke_method(
        &self,
        rt: &mut dyn Runtime,
        method: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, Abort>;
}

/// Maps code CIDs to actor implementations.
#[derive(Clone, Default)]
pub struct Engine {
    actors: HashMap<Cid, Arc<dyn ActorCode>>,
}

impl Engine {
    /// An engine with no actors.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine loaded with the system, init, account and reward actors.
    pub fn with_builtin_actors() -> Self {
        let mut engine = Self::new();
        builtin::register_builtin_actors(&mut engine);
        engine
    }

    /// Register actor code under `code`, replacing any existing registration.
    pub fn register(&mut self, code: Cid, actor: impl ActorCode) -> &mut Self {
        self.actors.insert(code, Arc::new(actor));
        self
    }

    /// Look up the code registered under `code`.
    pub fn get(&self, code: &Cid) -> Option<Arc<dyn ActorCode>> {
        self.actors.get(code).cloned()
    }

    pub fn contains(&self, code: &Cid) -> bool {
        self.actors.contains_key(code)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.actors.keys()).finish()
    }
}

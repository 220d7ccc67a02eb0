// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
//! A deterministic message interpreter for a Filecoin-style actor ledger.
//!
//! Messages are applied by an [`Executor`](executor::Executor) against a
//! [`Machine`](machine::Machine). Each message is dispatched by a
//! [`CallManager`](call_manager::CallManager) to native actor code registered in an
//! [`Engine`](engine::Engine), which sees the chain only through the
//! [`Runtime`](runtime::Runtime) capability surface.
use cid::Cid;
use fvm_ipld_encoding::{to_vec, DAG_CBOR};
use multihash_codetable::{Code, MultihashDigest};

pub mod actor_error;
pub mod builtin;
pub mod call_manager;
pub mod circ_supply;
pub mod engine;
pub mod epochs;
pub mod executor;
pub mod externs;
pub mod gas;
pub mod kernel;
pub mod machine;
pub mod rand;
pub mod runtime;
pub mod state_tree;

mod history_map;

pub use actor_error::{ActorError, Abort};
pub use engine::{ActorCode, Engine};
pub use kernel::{DefaultKernel, Kernel};
pub use runtime::{Runtime, RuntimeExt};

lazy_static::lazy_static! {
    /// Cid of the empty array Cbor bytes (`EMPTY_ARR_BYTES`).
    pub static ref EMPTY_ARR_CID: Cid = {
        let empty = to_vec::<[(); 0]>(&[]).unwrap();
        Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&empty))
    };
}

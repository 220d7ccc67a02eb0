// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The built-in actors shipped with the interpreter and their well-known IDs and code CIDs.

use cid::multihash::Multihash;
use cid::Cid;
use fvm_shared::{ActorID, IDENTITY_HASH, IPLD_RAW};

use crate::engine::Engine;

pub mod account;
pub mod cron;
pub mod init;
pub mod reward;
pub mod system;

pub use self::cron::CRON_ACTOR_ID;
pub use self::init::INIT_ACTOR_ID;
pub use self::reward::REWARD_ACTOR_ID;
pub use self::system::SYSTEM_ACTOR_ID;

/// Sink for burnt funds. Holds an account-code actor with no key.
pub const BURNT_FUNDS_ACTOR_ID: ActorID = 99;

/// Holds the mainnet reserve until it is disbursed.
pub const RESERVE_ACTOR_ID: ActorID = 90;

lazy_static::lazy_static! {
    pub static ref SYSTEM_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/system");
    pub static ref INIT_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/init");
    pub static ref REWARD_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/reward");
    pub static ref CRON_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/cron");
    pub static ref ACCOUNT_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/account");
}

/// Builtin code CIDs are raw identity hashes of the actor's name.
fn make_builtin(name: &[u8]) -> Cid {
    let mh = Multihash::<64>::wrap(IDENTITY_HASH, name).expect("actor name fits an identity hash");
    Cid::new_v1(IPLD_RAW, mh)
}

/// Returns true if the code belongs to an actor that may exist only once, at a fixed ID.
pub fn is_singleton_actor(code: &Cid) -> bool {
    code == &*SYSTEM_ACTOR_CODE_ID
        || code == &*INIT_ACTOR_CODE_ID
        || code == &*REWARD_ACTOR_CODE_ID
        || code == &*CRON_ACTOR_CODE_ID
}

/// Returns true if the code is the account actor's.
pub fn is_account_actor(code: &Cid) -> bool {
    code == &*ACCOUNT_ACTOR_CODE_ID
}

pub(crate) fn register_builtin_actors(engine: &mut Engine) {
    engine
        .register(*SYSTEM_ACTOR_CODE_ID, system::Actor)
        .register(*INIT_ACTOR_CODE_ID, init::Actor)
        .register(*REWARD_ACTOR_CODE_ID, reward::Actor)
        .register(*CRON_ACTOR_CODE_ID, cron::Actor)
        .register(*ACCOUNT_ACTOR_CODE_ID, account::Actor);
}

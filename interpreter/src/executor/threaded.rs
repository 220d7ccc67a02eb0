// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use anyhow::anyhow;
use cid::Cid;
use fvm_shared::message::Message;
use lazy_static::lazy_static;

use super::{ApplyKind, ApplyRet, Executor};

/// Stack size of the worker threads.
const WORKER_STACK_SIZE: usize = 64 << 20;

lazy_static! {
    static ref EXEC_POOL: yastl::Pool = yastl::Pool::with_config(
        8,
        yastl::ThreadConfig::new()
            .prefix("interpreter-executor")
            .stack_size(WORKER_STACK_SIZE),
    );
}

/// Wraps an executor so each message runs on a pool thread with a 64MiB stack.
///
/// Native actors recurse on the host stack, a few frames per nested send, so deep call chains
/// need more than a default thread stack.
pub struct ThreadedExecutor<E>(pub E);

impl<E> Executor for ThreadedExecutor<E>
where
    E: Executor + Send,
{
    type Kernel = E::Kernel;

    fn execute_message(
        &mut self,
        msg: Message,
        apply_kind: ApplyKind,
        raw_length: usize,
    ) -> anyhow::Result<ApplyRet> {
        let mut ret = Err(anyhow!("executor thread did not run"));

        EXEC_POOL.scoped(|scope| {
            scope.execute(|| ret = self.0.execute_message(msg, apply_kind, raw_length));
        });

        ret
    }

    fn flush(&mut self) -> anyhow::Result<Cid> {
        self.0.flush()
    }
}

// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use std::fmt::Display;

use fvm_shared::address::Address;
use fvm_shared::error::{ErrorNumber, ExitCode};
use fvm_shared::{ActorID, MethodNum};

use crate::kernel::SyscallError;

/// Where a failed message went wrong: the actors that aborted on the way out, plus whatever
/// stopped execution outright.
#[derive(Debug, Default, Clone)]
pub struct Backtrace {
    /// Innermost abort first.
    pub frames: Vec<Frame>,
    /// The error that stopped the message before (or instead of) the first frame.
    pub cause: Option<Cause>,
}

impl Display for Backtrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, frame) in self.frames.iter().rev().enumerate() {
            writeln!(f, "{:02}: {}", i, frame)?;
        }
        if let Some(cause) = &self.cause {
            writeln!(f, "--> caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl Backtrace {
    /// Nothing has failed, or everything that did was handled.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.cause.is_none()
    }

    /// Number of frames collected so far, for a later [`Backtrace::forget_since`].
    pub fn mark(&self) -> usize {
        self.frames.len()
    }

    /// Drop the frames pushed after `mark`. A call that returns normally has dealt with whatever
    /// failed beneath it, so those frames no longer explain anything.
    pub fn forget_since(&mut self, mark: usize) {
        self.frames.truncate(mark);
    }

    /// Start over from `cause`, dropping any frames left from earlier failures.
    pub fn begin(&mut self, cause: Cause) {
        self.cause = Some(cause);
        self.frames.clear();
    }

    /// Attach `cause` to the frames already collected.
    pub fn set_cause(&mut self, cause: Cause) {
        self.cause = Some(cause);
    }

    /// Record an abort. Frames arrive innermost first, as the stack unwinds.
    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame)
    }
}

/// One actor's abort.
#[derive(Clone, Debug)]
pub struct Frame {
    /// The aborting actor.
    pub source: ActorID,
    /// The method it was running.
    pub method: MethodNum,
    /// Exit code after illegal codes were replaced.
    pub code: ExitCode,
    /// The actor's abort message.
    pub message: String,
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (method {}) -- {} ({})",
            Address::new_id(self.source),
            self.method,
            &self.message,
            self.code,
        )
    }
}

/// What stopped execution, when it wasn't an actor abort.
#[derive(Clone, Debug)]
pub enum Cause {
    /// The top-level send itself failed, e.g. the receiver doesn't exist.
    Syscall {
        /// Which kernel operation failed, e.g. `"send"`.
        operation: &'static str,
        error: ErrorNumber,
        message: String,
    },
    /// An internal error. `backtrace` is only populated when `RUST_BACKTRACE` is set.
    Fatal {
        /// The error chain, alternate-formatted.
        error_msg: String,
        backtrace: String,
    },
}

impl Cause {
    pub fn from_syscall(operation: &'static str, err: SyscallError) -> Self {
        Self::Syscall {
            operation,
            error: err.1,
            message: err.0,
        }
    }

    pub fn from_fatal(err: anyhow::Error) -> Self {
        Self::Fatal {
            error_msg: format!("{:#}", err),
            backtrace: err.backtrace().to_string(),
        }
    }
}

impl Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cause::Syscall {
                operation,
                error,
                message,
            } => {
                write!(
                    f,
                    "{} -- {} ({}: {})",
                    operation, &message, *error as u32, error,
                )
            }
            Cause::Fatal {
                error_msg,
                backtrace,
            } => {
                write!(f, "[FATAL] Error: {}, Backtrace:\n{}", error_msg, backtrace)
            }
        }
    }
}

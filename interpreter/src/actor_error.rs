// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::error::{ErrorNumber, ExitCode};
use thiserror::Error;

use crate::kernel::{ExecutionError, SyscallError};

/// An error raised by actor code. The exit code is reported in the receipt of the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("ActorError(exit_code: {exit_code:?}, msg: {msg})")]
pub struct ActorError {
    /// The exit code for this invocation.
    /// Codes less than `FIRST_USER_EXIT_CODE` are prohibited and will be overwritten by the VM.
    exit_code: ExitCode,
    /// Message for debugging purposes.
    msg: String,
}

impl ActorError {
    /// Creates a new ActorError. This method does not check that the code is in the
    /// range of valid actor abort codes.
    pub fn unchecked(code: ExitCode, msg: String) -> Self {
        Self {
            exit_code: code,
            msg,
        }
    }

    pub fn illegal_argument(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_ILLEGAL_ARGUMENT, msg)
    }
    pub fn not_found(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_NOT_FOUND, msg)
    }
    pub fn forbidden(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_FORBIDDEN, msg)
    }
    pub fn insufficient_funds(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_INSUFFICIENT_FUNDS, msg)
    }
    pub fn illegal_state(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_ILLEGAL_STATE, msg)
    }
    pub fn serialization(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_SERIALIZATION, msg)
    }
    pub fn unhandled_message(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_UNHANDLED_MESSAGE, msg)
    }
    pub fn assertion_failed(msg: String) -> Self {
        Self::unchecked(ExitCode::USR_ASSERTION_FAILED, msg)
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// Prepend context, `"{msg}: {original}"`.
    pub fn wrap(mut self, msg: impl AsRef<str>) -> Self {
        self.msg = format!("{}: {}", msg.as_ref(), self.msg);
        self
    }
}

impl From<fvm_ipld_encoding::Error> for ActorError {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Build an [`ActorError`] from one of its constructor names and a message, e.g.
/// `actor_error!(forbidden; "actor {} may not do that", id)`.
#[macro_export]
macro_rules! actor_error {
    ( $code:ident; $msg:expr ) => { $crate::ActorError::$code($msg.to_string()) };
    ( $code:ident; $msg:literal $(, $ex:expr)+ ) => {
        $crate::ActorError::$code(format!($msg, $($ex,)*))
    };
    // Comma-separated forms.
    ( $code:ident, $msg:expr ) => { $crate::actor_error!($code; $msg) };
    ( $code:ident, $msg:literal $(, $ex:expr)+ ) => {
        $crate::actor_error!($code; $msg $(, $ex)*)
    };
}

/// How a native actor invocation ended, if not with a return value.
#[derive(Debug, Error)]
pub enum Abort {
    /// The actor explicitly aborted with the given exit code.
    #[error("exit with code {0:?} ({1})")]
    Exit(ExitCode, String),
    /// The actor ran out of gas.
    #[error("out of gas")]
    OutOfGas,
    /// The system failed with a fatal error.
    #[error("fatal error: {0:#}")]
    Fatal(anyhow::Error),
}

impl From<ActorError> for Abort {
    fn from(e: ActorError) -> Self {
        Abort::Exit(e.exit_code, e.msg)
    }
}

impl From<ExecutionError> for Abort {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::OutOfGas => Abort::OutOfGas,
            ExecutionError::Fatal(err) => Abort::Fatal(err),
            ExecutionError::Syscall(SyscallError(msg, number)) => {
                Abort::Exit(exit_code_for_syscall_error(number), msg)
            }
        }
    }
}

impl From<fvm_ipld_encoding::Error> for Abort {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        ActorError::from(e).into()
    }
}

/// The exit code an actor aborts with when it propagates a failed syscall.
pub fn exit_code_for_syscall_error(number: ErrorNumber) -> ExitCode {
    match number {
        ErrorNumber::IllegalArgument => ExitCode::USR_ILLEGAL_ARGUMENT,
        ErrorNumber::NotFound => ExitCode::USR_NOT_FOUND,
        ErrorNumber::InsufficientFunds => ExitCode::USR_INSUFFICIENT_FUNDS,
        ErrorNumber::Forbidden => ExitCode::USR_FORBIDDEN,
        ErrorNumber::IllegalOperation => ExitCode::USR_ILLEGAL_STATE,
        ErrorNumber::Serialization => ExitCode::USR_SERIALIZATION,
        _ => ExitCode::USR_ASSERTION_FAILED,
    }
}

// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use std::fmt::Display;

use fvm_shared::error::ErrorNumber;

/// Execution result.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Convenience macro for generating syscall errors.
///
/// ```ignore
/// syscall_error!(NotFound; "actor {} does not exist", id)
/// ```
#[macro_export]
macro_rules! syscall_error {
    ($code:ident; $msg:literal $(, $ex:expr)*) => {
        $crate::kernel::SyscallError::new(
            fvm_shared::error::ErrorNumber::$code,
            format_args!($msg, $($ex,)*),
        )
    };

    ($code:ident; $msg:expr) => {
        $crate::kernel::SyscallError::new(fvm_shared::error::ErrorNumber::$code, $msg)
    };

    ($code:ident) => {
        $crate::kernel::SyscallError::new(fvm_shared::error::ErrorNumber::$code, "")
    };
}

/// Execution error. Syscall errors are recoverable by the calling actor, out-of-gas unwinds the
/// whole message, and fatal errors indicate a broken machine.
#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("out of gas")]
    OutOfGas,
    #[error(transparent)]
    Syscall(#[from] SyscallError),
    #[error("fatal error: {0:#}")]
    Fatal(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Fatal errors abort the whole message and are never visible to actors.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Fatal(_))
    }
}

/// A recoverable error returned from a kernel operation, tagged with the error number reported
/// to the calling actor.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("syscall error: {0} (exit_code={1:?})")]
pub struct SyscallError(pub String, pub ErrorNumber);

impl SyscallError {
    pub fn new<D: Display>(c: ErrorNumber, d: D) -> Self {
        SyscallError(d.to_string(), c)
    }
}

/// Classifies arbitrary errors into [`ExecutionError`]s.
pub trait ClassifyResult: Sized {
    type Value;
    type Error;

    fn or_fatal(self) -> Result<Self::Value>
    where
        Self::Error: Into<anyhow::Error>;

    fn or_error(self, code: ErrorNumber) -> Result<Self::Value>
    where
        Self::Error: Display;

    fn or_illegal_argument(self) -> Result<Self::Value>
    where
        Self::Error: Display,
    {
        self.or_error(ErrorNumber::IllegalArgument)
    }
}

impl<T, E> ClassifyResult for std::result::Result<T, E> {
    type Value = T;
    type Error = E;

    fn or_fatal(self) -> Result<Self::Value>
    where
        Self::Error: Into<anyhow::Error>,
    {
        self.map_err(|e| ExecutionError::Fatal(e.into()))
    }

    fn or_error(self, code: ErrorNumber) -> Result<Self::Value>
    where
        Self::Error: Display,
    {
        self.map_err(|e| ExecutionError::Syscall(SyscallError(e.to_string(), code)))
    }
}

/// Adds context to kernel errors, keeping their classification.
pub trait Context {
    type WithContext;

    fn context<D>(self, context: D) -> Self::WithContext
    where
        D: Display;

    fn with_context<D, F>(self, f: F) -> Self::WithContext
    where
        D: Display,
        F: FnOnce() -> D;
}

impl<T> Context for Result<T> {
    type WithContext = Result<T>;

    fn context<D: Display>(self, context: D) -> Self::WithContext {
        self.map_err(|e| e.context(context))
    }

    fn with_context<D, F>(self, f: F) -> Self::WithContext
    where
        D: Display,
        F: FnOnce() -> D,
    {
        self.map_err(|e| e.with_context(f))
    }
}

impl Context for ExecutionError {
    type WithContext = Self;

    fn context<D: Display>(self, context: D) -> Self {
        use ExecutionError::*;
        match self {
            Syscall(SyscallError(msg, code)) => {
                Syscall(SyscallError(format!("{context}: {msg}"), code))
            }
            Fatal(e) => Fatal(e.context(context.to_string())),
            OutOfGas => OutOfGas,
        }
    }

    fn with_context<D, F>(self, f: F) -> Self
    where
        D: Display,
        F: FnOnce() -> D,
    {
        self.context(f())
    }
}

use crate::instance::FaultDetails;
use anyhow::Error as AnyError;
use qvm_module::LoadError;
use thiserror::Error;

/// qvm runtime errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {}", _0)]
    InvalidArgument(&'static str),

    /// The image was rejected by the loader.
    #[error("Module error: {}", _0)]
    ModuleError(#[from] LoadError),

    /// Native code could not be generated for the module.
    #[error("Compile error: {}", _0)]
    CompileError(#[from] qvmc::Error),

    /// An attempt to look up a module function by its symbol name failed.
    #[error("Symbol not found: {}", _0)]
    SymbolNotFound(String),

    /// The instruction index passed as an entry point does not start a function.
    #[error("Function not found: instruction {}", _0)]
    FuncNotFound(usize),

    /// An instance aborted due to a runtime fault.
    #[error("Runtime fault: {}", _0)]
    RuntimeFault(FaultDetails),

    /// The instance faulted during an earlier invocation and can no longer run.
    #[error("Instance faulted: {}", _0)]
    InstanceFaulted(FaultDetails),

    /// A syscall handler ended the invocation.
    #[error("Runtime terminated: {}", _0)]
    RuntimeTerminated(String),

    /// A catch-all for internal errors that are likely unrecoverable by the runtime user.
    #[error("Internal error: {}", _0)]
    InternalError(#[source] AnyError),
}

impl Error {
    /// The fault that ended an invocation, if any.
    pub fn fault(&self) -> Option<&FaultDetails> {
        match self {
            Error::RuntimeFault(details) | Error::InstanceFaulted(details) => Some(details),
            _ => None,
        }
    }
}

#[macro_export]
macro_rules! qvm_bail {
    ($e:expr) => {
        return Err(qvm_format_err!($e));
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(qvm_format_err!($fmt, $($arg)*));
    };
}

#[macro_export(local_inner_macros)]
macro_rules! qvm_ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            qvm_bail!($e);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            qvm_bail!($fmt, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! qvm_format_err {
    ($($arg:tt)*) => { $crate::error::Error::InternalError(anyhow::format_err!($($arg)*)) }
}

#[cfg(test)]
mod tests {
    use super::Error;

    fn half(n: u32) -> Result<u32, Error> {
        qvm_ensure!(n % 2 == 0, "{} is odd", n);
        if n > 100 {
            qvm_bail!("{} is too large", n);
        }
        Ok(n / 2)
    }

    #[test]
    fn internal_errors_carry_their_message() {
        assert_eq!(half(8).unwrap(), 4);
        match half(7) {
            Err(Error::InternalError(e)) => assert_eq!(e.to_string(), "7 is odd"),
            other => panic!("unexpected {:?}", other),
        }
        match half(200) {
            Err(e @ Error::InternalError(_)) => {
                assert_eq!(e.to_string(), "Internal error: 200 is too large")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

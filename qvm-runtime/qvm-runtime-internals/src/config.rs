use crate::error::Error;
pub use qvmc::OptLevel;

/// Which engine executes an instance's code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    /// The portable interpreter.
    Interpreted,
    /// Native code generated by `qvmc`. Instance creation fails if the module cannot be compiled.
    Compiled,
    /// Native code when it can be generated, otherwise the interpreter.
    Auto,
}

/// Settings fixed when an instance is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Engine selected at instance creation. (default `Auto`)
    pub engine: Engine,
    /// Deepest nesting of host invocations into one instance. (default 32)
    pub max_call_level: u32,
    /// Number of recent syscalls retained for diagnostics; 0 disables the log. (default 0)
    pub syscall_log_capacity: usize,
    /// Emit a `trace!` event for every syscall. (default false)
    pub trace_syscalls: bool,
    /// Optimization level used when compiling natively. (default `Speed`)
    pub opt_level: OptLevel,
}

impl Default for Config {
    fn default() -> Config {
        Config::default()
    }
}

impl Config {
    pub const fn default() -> Config {
        Config {
            engine: Engine::Auto,
            max_call_level: 32,
            syscall_log_capacity: 0,
            trace_syscalls: false,
            opt_level: OptLevel::Speed,
        }
    }

    pub const fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub const fn with_max_call_level(mut self, max_call_level: u32) -> Self {
        self.max_call_level = max_call_level;
        self
    }

    pub const fn with_syscall_log_capacity(mut self, syscall_log_capacity: usize) -> Self {
        self.syscall_log_capacity = syscall_log_capacity;
        self
    }

    pub const fn with_trace_syscalls(mut self, trace_syscalls: bool) -> Self {
        self.trace_syscalls = trace_syscalls;
        self
    }

    pub const fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_call_level == 0 {
            return Err(Error::InvalidArgument(
                "max call level must allow at least one invocation",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACED: Config = Config::default()
        .with_engine(Engine::Interpreted)
        .with_trace_syscalls(true);

    #[test]
    fn builders_are_const() {
        assert_eq!(TRACED.engine, Engine::Interpreted);
        assert!(TRACED.trace_syscalls);
        assert_eq!(TRACED.max_call_level, 32);
    }

    #[test]
    fn zero_call_level_is_invalid() {
        assert!(Config::default().validate().is_ok());
        assert!(matches!(
            Config::default().with_max_call_level(0).validate(),
            Err(Error::InvalidArgument(_))
        ));
    }
}

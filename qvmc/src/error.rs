use cranelift_codegen::settings::SetError;
use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use thiserror::Error;

/// Errors raised while generating native code.
#[derive(Debug, Error)]
pub enum Error {
    /// The host machine is not a target Cranelift can generate code for.
    #[error("Unsupported host: {}", _0)]
    UnsupportedHost(&'static str),

    #[error("Codegen settings: {}", _0)]
    Settings(#[from] SetError),

    #[error("Target ISA: {}", _0)]
    Isa(#[from] CodegenError),

    /// Cranelift rejected the code generated for one function.
    #[error("Function definition for {}: {}", function, source)]
    FunctionDefinition {
        function: String,
        #[source]
        source: ModuleError,
    },

    #[error("Module: {}", _0)]
    Module(#[from] ModuleError),
}

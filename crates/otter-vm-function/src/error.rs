//! Function object error types

use thiserror::Error;

use crate::numeric::WasmType;

/// Errors raised while invoking or materializing a function object
#[derive(Debug, Error)]
pub enum FunctionError {
    /// Type error surfaced to script (e.g. calling through a bad signature)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Wrong number of arguments for a WebAssembly export
    #[error("TypeError: wasm function expects {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Parameter count of the signature
        expected: usize,
        /// Argument count at the call site
        actual: usize,
    },

    /// Argument not representable as the signature's parameter type
    #[error("TypeError: wasm parameter {index} expects {expected}, got {actual}")]
    ParameterType {
        /// Parameter position
        index: usize,
        /// Declared type
        expected: WasmType,
        /// `typeof` of the supplied value
        actual: &'static str,
    },

    /// Returned value does not match the signature's result type
    #[error("TypeError: wasm result expects {expected}, got {actual}")]
    ResultType {
        /// Declared type name, `void` when the signature has no result
        expected: &'static str,
        /// `typeof` of the returned value
        actual: &'static str,
    },

    /// On-demand parse of a deferred function body failed
    #[error("SyntaxError: deferred body of {function} failed to parse: {message}")]
    DeferredParse {
        /// Display name of the function
        function: String,
        /// Parser message
        message: String,
    },

    /// Internal error
    #[error("InternalError: {0}")]
    Internal(String),
}

impl FunctionError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for function object operations
pub type FunctionResult<T> = std::result::Result<T, FunctionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FunctionError::ArityMismatch {
            expected: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "TypeError: wasm function expects 2 arguments, got 1"
        );

        let err = FunctionError::ParameterType {
            index: 0,
            expected: WasmType::I32,
            actual: "string",
        };
        assert_eq!(err.to_string(), "TypeError: wasm parameter 0 expects i32, got string");
    }
}

// error.rs - Idiomatic error type over the engine's i32 error codes.
//
// The interpreter keeps returning raw i32 codes internally so the fail
// path stays a single pop-and-restore; the public entry points translate
// through this enum.

use std::fmt;

use crate::defs::*;

/// Error type for match, search and scan operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Allocation failure while growing match state.
    Memory,
    /// Backtrack stack grew past `match_stack_limit()`.
    MatchStackLimitOver,
    /// Stack underflow past the bottom sentinel (engine bug).
    StackBug,
    /// Instruction index outside the program, or an unknown instruction.
    UndefinedBytecode,
    /// The instruction after an empty-check was not a skippable one.
    UnexpectedBytecode,
    /// Input failed encoding validation.
    InvalidWideCharValue,
    /// Bad argument at the public boundary.
    InvalidArgument,
    /// The host raised the interrupt flag mid-match.
    Interrupted,
    /// Any other negative code.
    Other(i32),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Memory => write!(f, "memory allocation failed"),
            EngineError::MatchStackLimitOver => write!(f, "match-stack limit over"),
            EngineError::StackBug => write!(f, "stack corruption"),
            EngineError::UndefinedBytecode => write!(f, "undefined bytecode"),
            EngineError::UnexpectedBytecode => write!(f, "unexpected bytecode"),
            EngineError::InvalidWideCharValue => write!(f, "invalid character in input"),
            EngineError::InvalidArgument => write!(f, "invalid argument"),
            EngineError::Interrupted => write!(f, "interrupted"),
            EngineError::Other(code) => write!(f, "error code {}", code),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<i32> for EngineError {
    fn from(code: i32) -> Self {
        match code {
            ERR_MEMORY => EngineError::Memory,
            ERR_MATCH_STACK_LIMIT_OVER => EngineError::MatchStackLimitOver,
            ERR_STACK_BUG => EngineError::StackBug,
            ERR_UNDEFINED_BYTECODE => EngineError::UndefinedBytecode,
            ERR_UNEXPECTED_BYTECODE => EngineError::UnexpectedBytecode,
            ERR_INVALID_WIDE_CHAR_VALUE => EngineError::InvalidWideCharValue,
            ERR_INVALID_ARGUMENT => EngineError::InvalidArgument,
            ERR_INTERRUPTED => EngineError::Interrupted,
            _ => EngineError::Other(code),
        }
    }
}

impl EngineError {
    /// The underlying numeric code.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Memory => ERR_MEMORY,
            EngineError::MatchStackLimitOver => ERR_MATCH_STACK_LIMIT_OVER,
            EngineError::StackBug => ERR_STACK_BUG,
            EngineError::UndefinedBytecode => ERR_UNDEFINED_BYTECODE,
            EngineError::UnexpectedBytecode => ERR_UNEXPECTED_BYTECODE,
            EngineError::InvalidWideCharValue => ERR_INVALID_WIDE_CHAR_VALUE,
            EngineError::InvalidArgument => ERR_INVALID_ARGUMENT,
            EngineError::Interrupted => ERR_INTERRUPTED,
            EngineError::Other(code) => *code,
        }
    }
}

/// Map an interpreter result to the public shape: `Ok(Some(n))` for a
/// match value `n >= 0`, `Ok(None)` for MISMATCH, `Err` otherwise.
pub(crate) fn into_result(r: i32) -> Result<Option<usize>, EngineError> {
    if r >= 0 {
        Ok(Some(r as usize))
    } else if r == MISMATCH {
        Ok(None)
    } else {
        Err(EngineError::from(r))
    }
}

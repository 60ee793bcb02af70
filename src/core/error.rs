//! Error types shared by the code compiler and the register allocation pass.
//!
//! Errors are plain values; every fallible operation returns
//! [`CompileResult`]. The variants form the stable set of codes the pass can
//! report to its caller. Any error aborts the remaining pass steps; the
//! common cleanup (virtual-register link reset, arena reset) still runs.

use thiserror::Error;

/// Error codes reported by the code compiler and the register allocator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileError {
    /// Arena or auxiliary allocation failed.
    #[error("no heap memory")]
    NoHeapMemory,

    /// The architecture adapter does not match the code compiler's target.
    #[error("invalid architecture")]
    InvalidArch,

    /// Instruction id not present in the instruction database.
    #[error("invalid instruction")]
    InvalidInstruction,

    /// Operand refers to a virtual register that was never created.
    #[error("invalid virtual register id")]
    InvalidVirtId,

    /// The node list violates the input contract (missing sentinel, jump
    /// without a label target, code between labels attached to one block).
    #[error("invalid state")]
    InvalidState,

    /// Two operands of one instruction demand different fixed output
    /// registers for the same virtual register.
    #[error("overlapped fixed registers")]
    OverlappedRegs,
}

/// Result type used throughout the crate.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(CompileError::NoHeapMemory.to_string(), "no heap memory");
        assert_eq!(
            CompileError::OverlappedRegs.to_string(),
            "overlapped fixed registers"
        );
    }

    #[test]
    fn test_error_is_copy_eq() {
        let a = CompileError::InvalidState;
        let b = a;
        assert_eq!(a, b);
        assert_ne!(a, CompileError::InvalidArch);
    }
}

use crate::jvm::{EncodeError, ParseError};

/// Why a method's control flow could not be resolved into verification metadata
///
/// These are properties of the bytecode itself, independent of whatever stale frames the buffer
/// carried: code that trips one of these would be rejected by a verifier no matter what frames
/// were attached to it.
#[derive(Debug)]
pub enum CfgError {
    /// Opcode this engine does not know
    UnsupportedOpcode { opcode: u8, offset: usize },

    /// `jsr`/`ret`/`jsr_w`: subroutines were removed from the format along with the split
    /// verifier, so code containing them cannot carry stack map frames at all
    Subroutine { offset: usize },

    /// Instruction ran off the end of the code array
    TruncatedCode { offset: usize },

    /// Branch or exception handler pointing outside the code or into the middle of an
    /// instruction
    BadJumpTarget { offset: usize, target: i64 },

    /// Methods longer than `u16` offsets can address cannot carry frames
    OversizedCode { length: usize },

    /// More value slots popped than the stack holds
    StackUnderflow { offset: usize },

    /// Operand stack depths disagree between two paths into the same target
    StackHeightMismatch { target: usize },

    /// Two paths into the same target carry stack slot types with no common supertype
    UnjoinableStack { target: usize, slot: usize },

    /// An instruction's operand had the wrong verification type (including loads from a local
    /// variable slot that holds nothing usable on some path)
    TypeMismatch { offset: usize },

    /// Local variable index past `max_locals` (or argument list wider than `max_locals`)
    BadLocalIndex { offset: usize, index: u16 },

    /// Constant pool reference that is missing or of the wrong kind for the instruction
    BadConstant { offset: usize, index: u16 },

    /// Reachable control flow runs off the end of the code array
    FallsOffCode { offset: usize },
}

/// Failure of a repair pass as a whole
#[derive(Debug)]
pub enum Error {
    /// The buffer is not a well-formed class file
    Parse(ParseError),

    /// A method's control flow is fundamentally invalid
    Cfg { method: String, error: CfgError },

    /// The repaired class could not be re-encoded
    Encode(EncodeError),
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Error {
        Error::Encode(err)
    }
}

/// Failure to make sense of an input buffer as a class file
#[derive(Debug)]
pub enum ParseError {
    /// The buffer does not start with `0xCAFEBABE`
    BadMagic([u8; 4]),

    /// Input ended in the middle of a table or structure
    Truncated,

    /// The class file structure ended before the buffer did
    TrailingBytes(usize),

    /// Unknown constant pool tag
    BadConstantTag(u8),

    /// Constant pool index that is out of range or refers to the wrong kind of constant
    BadConstantIndex(u16),

    /// Reserved stack map frame type
    BadFrameType(u8),

    /// Unknown verification type tag inside a stack map frame
    BadVerificationTypeTag(u8),

    /// Field or method descriptor that does not parse
    BadDescriptor(String),

    /// String constant whose bytes are not valid modified UTF-8
    BadUtf8,

    IoError(std::io::Error),
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> ParseError {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => ParseError::Truncated,
            _ => ParseError::IoError(err),
        }
    }
}

/// Failure to write a structured class back out as bytes
#[derive(Debug)]
pub enum EncodeError {
    /// More constants than a `u16` index can address
    ConstantPoolOverflow { count: usize },

    /// A bytecode offset no longer fits in the `u16` slot it must occupy (eg. an
    /// exception handler program counter after code was inserted)
    OffsetOverflow { offset: usize },

    /// The model refers to a constant pool entry that does not exist
    MissingConstant(u16),

    /// The model holds something that cannot be lowered back to bytes (eg. a statement with no
    /// lowering for the method's result type)
    InconsistentModel(String),

    IoError(std::io::Error),
}

impl From<std::io::Error> for EncodeError {
    fn from(err: std::io::Error) -> EncodeError {
        EncodeError::IoError(err)
    }
}

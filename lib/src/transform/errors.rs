use crate::editor::MutationError;
use crate::jvm::{EncodeError, ParseError};
use crate::repair;

/// Pipeline stage a transformation failed in
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Mutate,
    Encode,
    Repair,
}

/// Why one class's transformation was abandoned
///
/// Whatever the stage, the dispatcher's answer to the host is the same: keep the original
/// buffer. The error itself only ever reaches the log.
#[derive(Debug)]
pub enum Error {
    Parse(ParseError),
    Mutation(MutationError),
    Encode(EncodeError),
    Repair(repair::Error),
}

impl Error {
    pub fn stage(&self) -> Stage {
        match self {
            Error::Parse(_) => Stage::Parse,
            Error::Mutation(_) => Stage::Mutate,
            Error::Encode(_) => Stage::Encode,
            Error::Repair(_) => Stage::Repair,
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<MutationError> for Error {
    fn from(err: MutationError) -> Error {
        Error::Mutation(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Error {
        Error::Encode(err)
    }
}

impl From<repair::Error> for Error {
    fn from(err: repair::Error) -> Error {
        Error::Repair(err)
    }
}

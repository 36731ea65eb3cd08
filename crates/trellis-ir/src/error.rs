//! Error type shared by every fallible IR operation.

use derive_more::{Display, Error, From};

use crate::bytecode::BytecodeError;
use crate::parser::ParseError;
use crate::verify::VerificationError;

/// Collection named in out-of-bounds errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum Collection {
    #[display("region")]
    Region,
    #[display("block")]
    Block,
    #[display("operation")]
    Operation,
    #[display("operand")]
    Operand,
    #[display("result")]
    Result,
    #[display("block argument")]
    BlockArgument,
    #[display("attribute")]
    Attribute,
}

/// Coarse classification of [`IrError`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Bounds,
    KeyNotFound,
    InvalidSlice,
    InvalidConstructionArgument,
    OwnershipViolation,
    NameMismatch,
    VerificationFailure,
    UserCallbackFailure,
    InvalidHandle,
    InvalidResultCount,
    NestingTooDeep,
    Registry,
    Parse,
    Bytecode,
    Io,
}

#[derive(Debug, Display, Error, From)]
pub enum IrError {
    #[from(ignore)]
    #[display("attempt to access out of bounds {collection} at index {index} (length {len})")]
    OutOfBounds {
        collection: Collection,
        index: isize,
        len: usize,
    },

    #[from(ignore)]
    #[display("attribute '{key}' not found")]
    KeyNotFound { key: String },

    #[from(ignore)]
    #[display("slice step cannot be zero")]
    ZeroSliceStep,

    #[from(ignore)]
    #[display("Invalid attribute key (null) when attempting to create the operation \"{op}\"")]
    NullAttributeKey { op: String },

    #[from(ignore)]
    #[display(
        "Invalid attribute key (not a string) when attempting to create the operation \"{op}\""
    )]
    NonStringAttributeKey { op: String },

    #[from(ignore)]
    #[display(
        "Invalid attribute value for the key \"{key}\" when attempting to create the operation \"{op}\""
    )]
    InvalidAttributeValue { key: String, op: String },

    #[from(ignore)]
    #[display(
        "Found an invalid (null) attribute value for the key \"{key}\" when attempting to create the operation \"{op}\""
    )]
    NullAttributeValue { key: String, op: String },

    #[from(ignore)]
    #[display("value {value} is not a block argument")]
    NotBlockArgument { value: String },

    #[from(ignore)]
    #[display("operation '{op}' is already attached to a block")]
    AlreadyAttached { op: String },

    #[from(ignore)]
    #[display("operation '{op}' has no parent")]
    NoParent { op: String },

    #[from(ignore)]
    #[display("operation '{op}' is not attached to a block")]
    NotAttached { op: String },

    #[from(ignore)]
    #[display("operations '{first}' and '{second}' are not in the same block")]
    NotInSameBlock { first: String, second: String },

    #[from(ignore)]
    #[display("cannot place operation '{op}' inside one of its own regions")]
    CyclicOwnership { op: String },

    #[from(ignore)]
    #[display("insertion point anchor '{anchor}' is no longer in the target block")]
    StaleInsertionPoint { anchor: String },

    #[from(ignore)]
    #[display("Expected a '{expected}' op, got: '{actual}'")]
    NameMismatch { expected: String, actual: String },

    #[display("{_0}")]
    Verification(VerificationError),

    #[from(ignore)]
    #[display("walk callback failed: {source}")]
    CallbackFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[from(ignore)]
    #[display("cross-context handle: {handle} does not belong to this context")]
    CrossContext { handle: String },

    #[from(ignore)]
    #[display("handle {handle} refers to an erased entity")]
    Erased { handle: String },

    #[from(ignore)]
    #[display("Cannot call .result on operation {op} which has {count} results")]
    InvalidResultCount { op: String, count: usize },

    #[from(ignore)]
    #[display("regions under '{op}' nest deeper than {limit} levels")]
    NestingTooDeep { op: String, limit: usize },

    #[from(ignore)]
    #[display("operation '{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[display("{_0}")]
    Parse(ParseError),

    #[display("{_0}")]
    Bytecode(BytecodeError),

    #[display("I/O error: {_0}")]
    Io(std::io::Error),
}

pub type Result<T> = std::result::Result<T, IrError>;

impl IrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IrError::OutOfBounds { .. } => ErrorKind::Bounds,
            IrError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            IrError::ZeroSliceStep => ErrorKind::InvalidSlice,
            IrError::NullAttributeKey { .. }
            | IrError::NonStringAttributeKey { .. }
            | IrError::InvalidAttributeValue { .. }
            | IrError::NullAttributeValue { .. }
            | IrError::NotBlockArgument { .. } => ErrorKind::InvalidConstructionArgument,
            IrError::AlreadyAttached { .. }
            | IrError::NoParent { .. }
            | IrError::NotAttached { .. }
            | IrError::NotInSameBlock { .. }
            | IrError::CyclicOwnership { .. }
            | IrError::StaleInsertionPoint { .. } => ErrorKind::OwnershipViolation,
            IrError::NameMismatch { .. } => ErrorKind::NameMismatch,
            IrError::Verification(_) => ErrorKind::VerificationFailure,
            IrError::CallbackFailed { .. } => ErrorKind::UserCallbackFailure,
            IrError::CrossContext { .. } | IrError::Erased { .. } => ErrorKind::InvalidHandle,
            IrError::InvalidResultCount { .. } => ErrorKind::InvalidResultCount,
            IrError::NestingTooDeep { .. } => ErrorKind::NestingTooDeep,
            IrError::AlreadyRegistered { .. } => ErrorKind::Registry,
            IrError::Parse(_) => ErrorKind::Parse,
            IrError::Bytecode(_) => ErrorKind::Bytecode,
            IrError::Io(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_messages_name_the_collection() {
        let region = IrError::OutOfBounds {
            collection: Collection::Region,
            index: 3,
            len: 1,
        };
        let operand = IrError::OutOfBounds {
            collection: Collection::Operand,
            index: -4,
            len: 2,
        };
        assert!(region.to_string().contains("out of bounds region"));
        assert!(operand.to_string().contains("out of bounds operand"));
        assert_ne!(region.to_string(), operand.to_string());
    }

    #[test]
    fn attribute_construction_messages_are_distinct() {
        let op = "builtin.module".to_string();
        let key = "some_key".to_string();
        let messages = [
            IrError::NullAttributeKey { op: op.clone() }.to_string(),
            IrError::NonStringAttributeKey { op: op.clone() }.to_string(),
            IrError::NullAttributeValue {
                key: key.clone(),
                op: op.clone(),
            }
            .to_string(),
            IrError::InvalidAttributeValue { key, op }.to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(
            messages[1],
            "Invalid attribute key (not a string) when attempting to create the operation \"builtin.module\""
        );
    }

    #[test]
    fn callback_failures_keep_their_source() {
        use std::error::Error as _;
        let err = IrError::CallbackFailed {
            source: "visitor exploded".into(),
        };
        assert_eq!(err.kind(), ErrorKind::UserCallbackFailure);
        assert_eq!(
            err.source().map(|s| s.to_string()).as_deref(),
            Some("visitor exploded")
        );
    }
}

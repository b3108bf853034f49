use super::class_file::{Constant, ConstantPoolOverflow};
use super::code::{BlockId, SynLabel};
use super::BinaryName;
use crate::util::Offset;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug)]
pub enum Error {
    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },
    IoError(std::io::Error),
    MethodCodeOverflow(Offset),
    MethodCodeMaxStackOverflow(usize),
    MethodCodeMaxLocalsOverflow(usize),

    /// Some table counted with a `u16` in the class file has too many entries
    TooManyEntries {
        table: &'static str,
        count: usize,
    },

    /// Full frame inference was requested on code using `jsr`/`ret`
    ///
    /// Computing only max stack and locals still works for such code.
    UnsupportedSubroutine,

    /// Opcode outside of the supported set (eg. `breakpoint`)
    UnsupportedInstruction {
        opcode: u8,
        offset: usize,
    },

    /// The class hierarchy does not know about this class
    MissingClass(BinaryName),

    /// Error from the class hierarchy, propagated verbatim
    ResolverFailure(String),

    /// A label was referenced but never placed
    UnplacedLabel(SynLabel),

    /// A label was placed twice
    DuplicateLabel(SynLabel),

    /// Exception handler range whose start label is placed after its end label
    InvalidExceptionRange {
        start: SynLabel,
        end: SynLabel,
    },

    /// Two paths reach the same block with different stack heights
    InconsistentStackHeight {
        block: BlockId,
        expected: usize,
        found: usize,
    },

    /// A block pops more than the stack holds on entry
    StackUnderflow(BlockId),

    /// Reachable code runs past the end of the method body
    FallsOffEnd(BlockId),

    /// Method body finished without any instructions
    MethodCodeNotFinished,

    BadDescriptor(String),

    /// Input bytes could not be decoded as a class file
    MalformedClass(String),

    /// Wraps an error with the method it happened in
    InMethod {
        method: String,
        error: Box<Error>,
    },
}

impl Error {
    /// Attach the name and descriptor of the method being built to this error
    pub fn in_method(self, method: impl Into<String>) -> Error {
        match self {
            located @ Error::InMethod { .. } => located,
            other => Error::InMethod {
                method: method.into(),
                error: Box::new(other),
            },
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "constant pool overflow at index {} when adding {:?}",
                offset, constant
            ),
            Error::IoError(err) => write!(f, "i/o error: {}", err),
            Error::MethodCodeOverflow(offset) => {
                write!(f, "method code is {} bytes (max is 65535)", offset.0)
            }
            Error::MethodCodeMaxStackOverflow(max) => {
                write!(f, "max stack of {} exceeds 65535", max)
            }
            Error::MethodCodeMaxLocalsOverflow(max) => {
                write!(f, "max locals of {} exceeds 65535", max)
            }
            Error::TooManyEntries { table, count } => {
                write!(f, "{} has {} entries (max is 65535)", table, count)
            }
            Error::UnsupportedSubroutine => f.write_str(
                "jsr/ret subroutines are not supported when computing frames \
                 (compute max stack and locals instead)",
            ),
            Error::UnsupportedInstruction { opcode, offset } => {
                write!(f, "unsupported opcode 0x{:02x} at offset {}", opcode, offset)
            }
            Error::MissingClass(name) => write!(f, "class hierarchy has no class {}", name),
            Error::ResolverFailure(msg) => write!(f, "class hierarchy failure: {}", msg),
            Error::UnplacedLabel(label) => write!(f, "label {:?} was never placed", label),
            Error::DuplicateLabel(label) => write!(f, "label {:?} was placed twice", label),
            Error::InvalidExceptionRange { start, end } => write!(
                f,
                "exception range starts at {:?} but ends earlier at {:?}",
                start, end
            ),
            Error::InconsistentStackHeight {
                block,
                expected,
                found,
            } => write!(
                f,
                "block {:?} is reached with stack heights {} and {}",
                block, expected, found
            ),
            Error::StackUnderflow(block) => write!(f, "stack underflow in block {:?}", block),
            Error::FallsOffEnd(block) => {
                write!(f, "block {:?} falls off the end of the code", block)
            }
            Error::MethodCodeNotFinished => f.write_str("method has an empty code array"),
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
            Error::MalformedClass(msg) => write!(f, "malformed class file: {}", msg),
            Error::InMethod { method, error } => write!(f, "in method {}: {}", method, error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::InMethod { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow {
            constant: overflow.constant,
            offset: overflow.offset,
        }
    }
}

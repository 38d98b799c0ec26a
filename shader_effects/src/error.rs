//! Unified error type (spec.md §7).

use thiserror::Error;

use crate::{block, generator, preprocessor, symbol};

/// A source location attached to a diagnostic, when known.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}"),
            (Some(file), None) => write!(f, "{file}"),
            _ => write!(f, "<unknown>"),
        }
    }
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorImpl);

#[derive(Debug, Error)]
enum ErrorImpl {
    #[error("{0}")]
    Preprocessor(#[from] preprocessor::Error),
    #[error("{0}")]
    Block(#[from] block::Error),
    #[error("{0}")]
    Symbol(#[from] symbol::Error),
    #[error("{0}")]
    Generator(#[from] generator::Error),
    #[error("external compiler failed: {0}")]
    Compiler(#[from] shader_effects_compiler::Error),
    #[error("{location}: scratch buffer not returned before {operation}")]
    ScratchNotReturned {
        location: Location,
        operation: &'static str,
    },
}

impl From<preprocessor::Error> for Error {
    fn from(e: preprocessor::Error) -> Self {
        Self(ErrorImpl::Preprocessor(e))
    }
}

impl From<block::Error> for Error {
    fn from(e: block::Error) -> Self {
        Self(ErrorImpl::Block(e))
    }
}

impl From<symbol::Error> for Error {
    fn from(e: symbol::Error) -> Self {
        Self(ErrorImpl::Symbol(e))
    }
}

impl From<generator::Error> for Error {
    fn from(e: generator::Error) -> Self {
        Self(ErrorImpl::Generator(e))
    }
}

impl From<shader_effects_compiler::Error> for Error {
    fn from(e: shader_effects_compiler::Error) -> Self {
        Self(ErrorImpl::Compiler(e))
    }
}

impl Error {
    pub fn scratch_not_returned(operation: &'static str) -> Self {
        Self(ErrorImpl::ScratchNotReturned {
            location: Location::unknown(),
            operation,
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

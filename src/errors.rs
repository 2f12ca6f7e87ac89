use crate::runtime::Exception;
use crate::types::ExternType;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// A malformed-module error: the input bytes cannot be decoded at all.
///
/// No resynchronization is attempted; the offset points at the first byte
/// that could not be understood.
#[derive(Debug, onlyerror::Error)]
pub enum SerializationError {
    /// The input bytes are not a valid module encoding.
    #[error("malformed module at offset {offset}: {message}")]
    Malformed {
        /// A string describing what could not be decoded.
        message: String,
        /// The byte offset where decoding failed.
        offset: usize,
    },
    /// The encoding is well-formed but uses a feature that is disabled.
    #[error("feature required at offset {offset}: {message}")]
    FeatureRequired { message: String, offset: usize },
}

impl SerializationError {
    pub fn offset(&self) -> usize {
        match self {
            Self::Malformed { offset, .. } | Self::FeatureRequired { offset, .. } => *offset,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Malformed { message, .. } | Self::FeatureRequired { message, .. } => message,
        }
    }
}

/// An invalid-module error: the bytes decode but the module violates typing,
/// index-bounds, or feature rules.
#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid module: {}", self.message)
    }
}

impl core::error::Error for ValidationError {}

/// An import that could not be resolved while linking.
#[derive(Debug, Clone)]
pub struct MissingImport {
    pub module: String,
    pub name: String,
    pub ty: ExternType,
}

impl fmt::Display for MissingImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} : {}", self.module, self.name, self.ty)
    }
}

/// Linking failed. All missing imports are collected before this is raised so
/// tooling can report them in one pass.
#[derive(Debug)]
pub struct LinkError {
    pub missing: Vec<MissingImport>,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing {} import(s):", self.missing.len())?;
        for import in &self.missing {
            write!(f, " {import}")?;
        }
        Ok(())
    }
}

impl core::error::Error for LinkError {}

/// An error produced by the compiler backend boundary.
#[derive(Debug, onlyerror::Error)]
pub enum CompileError {
    /// The backend rejected the module.
    #[error("compilation failed: {0}")]
    Backend(String),
    /// A precompiled-object custom section was expected but absent.
    #[error("module has no precompiled object section")]
    MissingPrecompiledObject,
    /// The module was not validated before being handed to the backend.
    #[error("module failed validation before compilation: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    #[error("{0}")]
    Serialization(#[from] SerializationError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Link(#[from] LinkError),
    #[error("{0}")]
    Compile(#[from] CompileError),
    /// A runtime exception escaped from instantiation or invocation.
    #[error("runtime exception: {0}")]
    Runtime(Exception),
}

impl From<Exception> for Error {
    fn from(e: Exception) -> Self {
        Self::Runtime(e)
    }
}

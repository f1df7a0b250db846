//! Error kinds surfaced by the filesystem and process APIs.
//!
//! The `Display` strings double as the fixed prefixes the shell writes to
//! standard error, followed by the failing command's name.

use thiserror::Error;

/// Errors returned by the filesystem API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("OPERATION NOT PERMITTED")]
    NotPermitted,
    #[error("NO SUCH FILE/DIRECTORY")]
    NotFound,
    #[error("PERMISSION DENIED")]
    PermDenied,
    #[error("NOT A DIRECTORY")]
    NotDir,
    #[error("IS A DIRECTORY")]
    IsDir,
    #[error("FILE EXISTS")]
    Exists,
    #[error("DIRECTORY NOT EMPTY")]
    NotEmpty,
    #[error("NO SPACE LEFT ON DEVICE")]
    NoSpace,
    #[error("INVALID ARGUMENT")]
    InvalidArg,
    #[error("RESOURCE BUSY")]
    Busy,
}

/// Errors returned by the process API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcError {
    #[error("NO SUCH PROCESS")]
    NoSuchProcess,
    #[error("INVALID PROCESS STATE")]
    InvalidState,
    #[error("NO CHILDREN")]
    NoChildren,
}

pub type FsResult<T> = Result<T, FsError>;
pub type ProcResult<T> = Result<T, ProcError>;

//! Error taxonomy for the KV-backed filesystem core.
//!
//! Mirrors the distinction the reference implementation blurred: a bare
//! catch-all around every KV call cannot tell a root CAS conflict (expected,
//! retried internally) apart from genuine on-disk corruption. Each case below
//! is its own variant so callers, and the engines themselves, can match on
//! exactly the ones they know how to handle.

use thiserror::Error;

/// Errors surfaced by the filesystem core.
#[derive(Error, Debug)]
pub enum Error {
    /// A name lookup found nothing. Directory/path lookups report this as
    /// `None` rather than an error; it only reaches callers here from
    /// operations (like unlink) for which "missing" is itself the failure.
    #[error("name not found")]
    NotFound,

    /// `link` was asked to bind a name that is already bound.
    #[error("name already exists")]
    AlreadyExists,

    /// A name longer than `MAX_NAME_LEN` was passed to a directory operation.
    #[error("directory entry name exceeds the maximum allowed length")]
    NameTooLong,

    /// On-disk bytes violated a structural invariant (e.g. a directory
    /// bucket tag that is neither `'D'` nor `'I'`, or a value shorter than
    /// its fixed header). Always indicates corruption, never a retry signal.
    #[error("corrupt on-disk state: {0}")]
    BadState(&'static str),

    /// The KV backend reported more than one concurrent version for a key.
    #[error("key has more than one concurrent version")]
    InconsistentVersions,

    /// A conditional put was rejected because the key's version had moved.
    /// Engines catch this themselves and restart the operation; it should
    /// never reach a caller of the filesystem surface.
    #[error("root CAS rejected by a concurrent writer")]
    Conflict,

    /// Anything else the backend failed with: transport, auth, timeouts.
    /// Propagated unchanged, never interpreted.
    #[error("backend store failure")]
    Backend(#[from] anyhow::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

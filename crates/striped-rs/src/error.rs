//! Error taxonomy for the striping engine (spec §7).
//!
//! Every variant maps to the POSIX errno the translator would hand back to
//! its caller; `errno()` is what `striped-cli`'s FUSE front end reads to
//! fill in a `reply.error(..)` call.

use thiserror::Error;

/// `StripeError` is the engine-wide error type returned by every fop.
#[derive(Debug, Error)]
pub enum StripeError {
    /// A child subvolume returned an errno for one or more chunks of a fop.
    /// Carries the first-encountered errno, in logical (not completion) order.
    #[error("child subvolume returned errno {errno} during {fop}")]
    ChildFailed { fop: &'static str, errno: i32 },

    /// Subvolumes disagreed on `stripe-count`, or gfids mismatched across replies.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// A fop that requires every subvolume up (namespace mutation) found one down.
    #[error("subvolume unavailable for {fop}: requires all subvolumes up")]
    Unavailable { fop: &'static str },

    /// The cached geometry descriptor is absent or degraded at a fop that requires it.
    #[error("geometry unavailable or degraded: {0}")]
    Geometry(String),

    /// The requested inode/fd has no published geometry and none could be discovered.
    #[error("no geometry descriptor for this file")]
    NoGeometry,

    /// A pattern-rule or block-size configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StripeError {
    /// `errno` maps this error to the POSIX errno a caller-facing fop reply should carry.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::ChildFailed { errno, .. } => *errno,
            Self::Consistency(_) => libc::EIO,
            Self::Unavailable { .. } => libc::ENOTCONN,
            Self::Geometry(_) => libc::EINVAL,
            Self::NoGeometry => libc::EBADFD,
            Self::InvalidConfig(_) => libc::EINVAL,
        }
    }
}

/// `Result` is the engine-wide result alias.
pub type Result<T> = std::result::Result<T, StripeError>;

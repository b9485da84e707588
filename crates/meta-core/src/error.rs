//! The closed set of error kinds the engines may return.
//!
//! Every public engine function returns `Result<T, Error>`. Dynamic,
//! context-stacked errors (`anyhow`) are reserved for the CLI boundary, which
//! turns an `Error` plus the surrounding operation into the user-facing
//! report the command layer owes on failure.

use std::path::PathBuf;

use thiserror::Error;

/// Whether a git or remote-backend failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitErrorKind {
    /// Timeout, connection reset, 5xx — safe to retry with backoff.
    Transient,
    /// Auth failure, ref not found — retrying cannot help.
    Permanent,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("manifest error: {message}")]
    Manifest { message: String },

    #[error("dependency error for {component}: {message}")]
    Dependency { component: String, message: String },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("unsatisfiable version constraints for {name}: {conflicting_ranges:?}")]
    Conflict {
        name: String,
        conflicting_ranges: Vec<String>,
    },

    #[error("lock mismatch for {component}: {discrepancy}")]
    LockMismatch {
        component: String,
        discrepancy: String,
    },

    #[error("git {kind:?} error on {component} ({operation}): {message}")]
    Git {
        component: String,
        operation: String,
        kind: GitErrorKind,
        message: String,
    },

    #[error("vendor engine error for {component}: {message}")]
    Vendor { component: String, message: String },

    #[error("secret detected in {component} at {path}: {pattern}")]
    SecretDetected {
        component: String,
        path: PathBuf,
        pattern: String,
    },

    #[error("checkpoint resume failed for {component}: {message}")]
    CheckpointResume { component: String, message: String },

    /// Not user-facing: internal signal meaning "no cache entry", never
    /// surfaced directly to a CLI user as a failure.
    #[error("cache miss for key {key}")]
    CacheMiss { key: String },

    #[error("remote backend error ({backend}): {message} (falling back to local)")]
    RemoteBackend { backend: String, message: String },

    #[error("workspace busy: locked by pid {pid} on {host} since {since}")]
    WorkspaceBusy {
        pid: u32,
        host: String,
        since: String,
    },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn manifest(message: impl Into<String>) -> Self {
        Error::Manifest {
            message: message.into(),
        }
    }

    pub fn dependency(component: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Dependency {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the kinds that are locally retryable (transient git and
    /// remote-backend failures).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Git {
                kind: GitErrorKind::Transient,
                ..
            } | Error::RemoteBackend { .. }
        )
    }

    /// Short, stable tag used in status reports and exit-path messages.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Error::Manifest { .. } => "ManifestError",
            Error::Dependency { .. } => "DependencyError",
            Error::Cycle { .. } => "CycleError",
            Error::Conflict { .. } => "ConflictError",
            Error::LockMismatch { .. } => "LockMismatch",
            Error::Git { .. } => "GitError",
            Error::Vendor { .. } => "VendorError",
            Error::SecretDetected { .. } => "SecretDetected",
            Error::CheckpointResume { .. } => "CheckpointResumeError",
            Error::CacheMiss { .. } => "CacheMiss",
            Error::RemoteBackend { .. } => "RemoteBackendError",
            Error::WorkspaceBusy { .. } => "WorkspaceBusy",
            Error::Cancelled { .. } => "Cancelled",
            Error::Io { .. } => "IoError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Process exit code mapping for the CLI.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::WorkspaceBusy { .. } => 3,
        Error::Cancelled { .. } => 4,
        Error::Manifest { .. } | Error::Dependency { .. } | Error::Cycle { .. } | Error::Conflict { .. } => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_git_error_is_retryable() {
        let err = Error::Git {
            component: "a".into(),
            operation: "fetch".into(),
            kind: GitErrorKind::Transient,
            message: "timeout".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn permanent_git_error_is_not_retryable() {
        let err = Error::Git {
            component: "a".into(),
            operation: "checkout".into(),
            kind: GitErrorKind::Permanent,
            message: "ref not found".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(
            exit_code(&Error::manifest("bad")),
            1
        );
        assert_eq!(
            exit_code(&Error::WorkspaceBusy {
                pid: 1,
                host: "h".into(),
                since: "t".into()
            }),
            3
        );
        assert_eq!(
            exit_code(&Error::Cancelled {
                reason: "sigint".into()
            }),
            4
        );
        assert_eq!(
            exit_code(&Error::Vendor {
                component: "a".into(),
                message: "x".into()
            }),
            2
        );
    }
}

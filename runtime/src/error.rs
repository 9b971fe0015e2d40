use std::path::PathBuf;

use thiserror::Error;

/// A common result type for the runtime crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the runtime core.
///
/// Variant names are the error kinds from the OCI runtime error model; each
/// carries whatever underlying error (if any) caused it so callers can log
/// the full chain.
#[derive(Error, Debug)]
pub enum Error {
    /// No container exists with the given id.
    #[error("container '{0}' does not exist")]
    NotExist(String),

    /// A container with the given id already exists.
    #[error("container '{0}' already exists")]
    AlreadyExists(String),

    /// The OCI spec failed validation.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A verb precondition was violated (e.g. start on a running container).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Mount destination resolution exited the rootfs.
    #[error("mount destination '{0}' escapes rootfs '{1}'")]
    EscapesRoot(PathBuf, PathBuf),

    /// A verb exceeded its configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A hook invocation failed in a phase where failure aborts the verb.
    #[error("hook '{0}' failed: {1}")]
    HookFailed(String, String),

    /// The underlying engine reported a failure.
    #[error("engine error: {0}")]
    EngineError(String),

    /// Wraps an OCI spec (de)serialization error.
    #[error("oci spec error: {0}")]
    OciSpec(#[from] oci_spec::OciSpecError),

    /// Wraps a `serde_json` (de)serialization error.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Wraps a filesystem or socket I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps an error returned by a `nix` syscall wrapper.
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),
}

impl Error {
    /// True for errors that `delete` should tolerate and best-effort past.
    pub fn is_best_effort_in_delete(&self) -> bool {
        matches!(self, Error::NotExist(_) | Error::Io(_))
    }
}

//! CLI-level error type: wraps the runtime library's [`runtime::Error`]
//! plus the extra failure modes that only exist at the process boundary
//! (config file loading, spec loading from the bundle, signal parsing).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    #[error("failed to load bundle spec: {0}")]
    OciSpec(#[from] oci_spec::OciSpecError),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to serialize output: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    #[error("container '{0}' not found")]
    NotFound(String),
}

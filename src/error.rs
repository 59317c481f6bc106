use thiserror::Error;

/// Flat error taxonomy for the whole crate, mirroring the syscall-level
/// granularity the runtime needs to report failures precisely.
#[derive(Error, Debug)]
pub enum PockyError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("ambiguous id '{0}' matches multiple entries")]
    Ambiguous(String),

    #[error("syscall '{syscall}' failed ({args}): {message}")]
    SyscallFailure {
        syscall: &'static str,
        args: String,
        message: String,
    },

    #[error("malformed image: {0}")]
    MalformedImage(String),

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid image config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external command '{command}' failed: {message}")]
    CommandFailure { command: String, message: String },
}

pub type PockyResult<T> = Result<T, PockyError>;

impl PockyError {
    pub fn syscall(syscall: &'static str, args: impl Into<String>, message: impl Into<String>) -> PockyError {
        PockyError::SyscallFailure {
            syscall,
            args: args.into(),
            message: message.into(),
        }
    }
}

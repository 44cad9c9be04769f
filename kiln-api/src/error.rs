use crate::RhiShaderStage;
use std::sync::Arc;

pub type RhiResult<T> = Result<T, RhiError>;

/// Generic error that contains all the different kinds of errors that may occur when using kiln
#[derive(Debug, Clone)]
pub enum RhiError {
    StringError(String),
    IoError(Arc<std::io::Error>),
    SerializationError(String),
    /// A fixed capacity budget was exceeded (pool size, buffer size)
    CapacityExhausted(String),
    /// Input that is still loading or reloading, retrying later may succeed
    SourceNotReady(String),
    ShaderCompilationFailed {
        stage: RhiShaderStage,
        message: String,
    },
}

impl std::error::Error for RhiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            RhiError::StringError(_) => None,
            RhiError::IoError(ref e) => Some(&**e),
            RhiError::SerializationError(_) => None,
            RhiError::CapacityExhausted(_) => None,
            RhiError::SourceNotReady(_) => None,
            RhiError::ShaderCompilationFailed { .. } => None,
        }
    }
}

impl core::fmt::Display for RhiError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            RhiError::StringError(ref e) => e.fmt(fmt),
            RhiError::IoError(ref e) => e.fmt(fmt),
            RhiError::SerializationError(ref e) => write!(fmt, "Serialization failed: {}", e),
            RhiError::CapacityExhausted(ref e) => write!(fmt, "Capacity exhausted: {}", e),
            RhiError::SourceNotReady(ref e) => write!(fmt, "Not ready: {}", e),
            RhiError::ShaderCompilationFailed {
                stage,
                ref message,
            } => write!(fmt, "Failed to compile {:?} shader: {}", stage, message),
        }
    }
}

impl From<&str> for RhiError {
    fn from(str: &str) -> Self {
        RhiError::StringError(str.to_string())
    }
}

impl From<String> for RhiError {
    fn from(string: String) -> Self {
        RhiError::StringError(string)
    }
}

impl From<std::io::Error> for RhiError {
    fn from(error: std::io::Error) -> Self {
        RhiError::IoError(Arc::new(error))
    }
}

impl From<bincode::Error> for RhiError {
    fn from(error: bincode::Error) -> Self {
        RhiError::SerializationError(error.to_string())
    }
}

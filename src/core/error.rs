use thiserror::Error;
#[derive(Error, Debug)]
pub enum AdbError {
    #[error("ADB not found in PATH, next to the executable, or at the configured path")]
    AdbNotFound,
    #[error("ADB command failed: {0}")]
    CommandFailed(String),
    #[error("ADB timeout after {0}s")]
    Timeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("UTF-8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
pub type Result<T> = std::result::Result<T, AdbError>;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A caller broke an operation's contract (missing background, no
    /// channels, no controllers, ...). Not retried.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),
    #[error("calibration error: {0}")]
    Calibration(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),
    #[error("invalid state: {0}")]
    State(String),
    #[error("engine worker stopped")]
    WorkerStopped,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

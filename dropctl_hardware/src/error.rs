use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("camera error: {0}")]
    Camera(String),
    #[error("frame timeout")]
    FrameTimeout,
    #[error("pump error: {0}")]
    Pump(String),
    #[error("pump bank expects {expected} inlet values, got {got}")]
    InletCount { expected: usize, got: usize },
    #[error("rig state lock poisoned")]
    Poisoned,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Stable error codes, handed to error callbacks alongside the description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Output container or video track could not be created.
    EncoderInit,
    /// The writer refused to begin its write session.
    WriteStart,
    /// The writer failed while recording or while flushing.
    RuntimeWrite,
    /// A single tick failed to produce an image.
    RenderSample,
    /// Invalid argument or precondition.
    Validation,
    /// Invalid or unreadable configuration.
    Config,
    /// Anything else (I/O with context, etc).
    Other,
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("encoder init error: {0}")]
    EncoderInit(String),

    #[error("write start error: {0}")]
    WriteStart(String),

    #[error("runtime write error: {0}")]
    RuntimeWrite(String),

    #[error("render sample error: {0}")]
    RenderSample(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaptureError {
    pub fn encoder_init(msg: impl Into<String>) -> Self {
        Self::EncoderInit(msg.into())
    }

    pub fn write_start(msg: impl Into<String>) -> Self {
        Self::WriteStart(msg.into())
    }

    pub fn runtime_write(msg: impl Into<String>) -> Self {
        Self::RuntimeWrite(msg.into())
    }

    pub fn render_sample(msg: impl Into<String>) -> Self {
        Self::RenderSample(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EncoderInit(_) => ErrorKind::EncoderInit,
            Self::WriteStart(_) => ErrorKind::WriteStart,
            Self::RuntimeWrite(_) => ErrorKind::RuntimeWrite,
            Self::RenderSample(_) => ErrorKind::RenderSample,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Config(_) => ErrorKind::Config,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}

use thiserror::Error;

pub type ZapmeResult<T> = Result<T, ZapmeError>;

#[derive(Debug, Error)]
pub enum ZapmeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

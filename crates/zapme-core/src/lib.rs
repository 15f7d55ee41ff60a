pub mod config;
pub mod error;

pub use config::ZapmeConfig;
pub use error::{ZapmeError, ZapmeResult};

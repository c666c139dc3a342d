//! Log records and the logger that tags them with flow identity.
mod logger;
mod record;

pub use logger::{Logger, LoggerProvider};
pub use record::{LogRecord, Severity};

//! Notifier adapters.
//!
//! - `LoggingNotifier` - structured log lines only
//! - `HttpNotifier` - posts to an external notification service

mod http;
mod logging;

pub use http::HttpNotifier;
pub use logging::LoggingNotifier;

mod correlation;
mod requests_logging;

pub use correlation::correlate_requests;
pub use requests_logging::{log_requests, RequestsLoggingLevel};

mod auth;
mod error_handler;

pub use auth::{OPERATION_ID_HEADER, auth_middleware};
pub use error_handler::log_errors;

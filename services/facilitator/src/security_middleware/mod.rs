pub mod auth;

pub use auth::{caller_of, ApiKeyAuth, API_KEY_HEADER};

//! Request and response models for the admin API.

pub mod common;
pub mod error;

pub use common::{ApiResponse, ResponseMeta};
pub use error::ErrorResponse;

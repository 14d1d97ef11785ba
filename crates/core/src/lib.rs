pub mod config;
pub mod error;
pub mod layout;
pub mod model;
pub mod trace;

pub use error::{OtellyError, Result};

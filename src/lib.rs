pub mod chat;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;

pub use error::{EdgeError, Result};

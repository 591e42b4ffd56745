//! Common types shared by the content studio crates

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};

#[cfg(test)]
mod tests;

pub mod callbacks;
pub mod codec;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod json;
pub mod lifecycle;
pub mod logging;
pub mod net;
pub mod script;
pub mod storage;
pub mod types;

pub use error::{Error, Result};
pub use handle::{Handle, ResourceKind};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

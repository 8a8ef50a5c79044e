pub mod access;
pub mod audit;
pub mod checksum;
pub mod chunk;
pub mod error;
pub mod localize;
pub mod lock;
pub mod manifest;
pub mod progress;
pub mod share;
pub mod shell;
pub mod workspace;

pub use error::{Error, Result};

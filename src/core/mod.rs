//! Core types shared by every layer: constants, configuration, errors,
//! the envelope wire format and the collaborator traits.

mod config;
pub mod constants;
mod envelope;
mod error;
mod traits;
mod types;

pub use config::*;
pub use envelope::*;
pub use error::*;
pub use traits::*;
pub use types::*;

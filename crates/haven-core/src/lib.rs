//! haven-core: shared types, collaborator contracts, and identity primitives.
//! All other Haven crates depend on this one.

pub mod config;
pub mod crypto;
pub mod protocol;
pub mod transport;

pub use protocol::{ShellMessage, STDIN};
pub use transport::{DestinationHash, HopCount};

//! In-memory mesh simulation for Haven.
//!
//! Provides:
//! - `SimNetwork`: routing table, announce fan-out and a `MeshTransport`
//!   plus `TransportFactory` backed by it
//! - `SimRemoteShell`: the far end of a shell link, scriptable from tests
//!
//! Every callback into the session layer runs on a thread owned by the
//! simulation, never on the caller's thread, matching a real transport.

mod link;
mod network;
mod remote;

pub use link::SimLink;
pub use network::{SimFactory, SimNetwork, SimTransport};
pub use remote::{LinkBehavior, SimRemoteShell};

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

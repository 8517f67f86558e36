//! haven-services: the session layer between the mesh transport and the host.

pub mod discovery;
pub mod facade;
pub mod gateway;
pub mod registry;
pub mod session;

pub use discovery::{AnnounceListener, DiscoveredEndpoint, DiscoveryCache};
pub use facade::TransportFacade;
pub use gateway::{GatewayOutcome, GatewayRegistry, GatewayState, ModeConflict};
pub use registry::SessionRegistry;
pub use session::{Phase, ReadOutcome, SessionError, SessionSettings, ShellSession};

//! Gateway server implementation

pub mod agent;
mod router;
mod server;
pub mod trust;

pub use agent::{Agent, InboundRequest, UnconfiguredAgent, UpstreamAgent};
pub use router::{AppState, create_router};
pub use server::Gateway;
pub use trust::{AGENT_PATH, Rejection, TrustGate};

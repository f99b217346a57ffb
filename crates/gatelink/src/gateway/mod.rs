//! Gateway connection: transport, heartbeat monitor, reconnect policy and the
//! session controller that ties them together.

mod client;
pub mod events;
mod heartbeat;
pub mod policy;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod transport;

pub use client::{gateway_url, GatewayClient};
pub use events::{DispatchEvent, GatewayEvent, Termination};
pub use heartbeat::{start_heartbeat_task, HeartbeatHandle, HeartbeatSignal};
pub use policy::{classify, DisconnectSignal, ReconnectAction, ReconnectPolicy, DEFAULT_TERMINAL_CODES};
pub use reconnect::{calculate_backoff, ReconnectConfig};
pub use session::Session;
pub use state::{AtomicConnectionState, ConnectionState};
pub use transport::{Outbound, TransportEvent, TransportLink};

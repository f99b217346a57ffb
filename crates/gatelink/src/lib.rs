//! # gatelink
//!
//! A persistent, resumable client for a real-time event gateway.
//!
//! [`GatewayClient`] keeps one authenticated WebSocket session alive: it
//! answers HELLO, keeps the heartbeat cadence, and resumes or re-identifies
//! after disconnects as the [`ReconnectPolicy`] decides. Dispatched events are
//! delivered on the channel returned by [`GatewayClient::start`].
//!
//! ```no_run
//! use gatelink::{bootstrap, ClientConfig, GatewayClient, GatewayEvent};
//! use gatelink_proto::Intents;
//!
//! # async fn demo() -> Result<(), gatelink::ClientError> {
//! let token = gatelink::config::load_token("token")?;
//! let endpoint = bootstrap::fetch_endpoint(&bootstrap::BootstrapConfig::default(), &token).await?;
//! let client = GatewayClient::new(endpoint, ClientConfig::new(token, Intents::GUILD_MESSAGES))?;
//!
//! let mut events = client.start().await?;
//! while let Some(event) = events.recv().await {
//!     if let GatewayEvent::Dispatch(dispatch) = event {
//!         println!("{} #{:?}", dispatch.name, dispatch.sequence);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod gateway;

pub use config::ClientConfig;
pub use error::ClientError;
pub use gateway::{
    ConnectionState, DispatchEvent, GatewayClient, GatewayEvent, ReconnectAction, ReconnectConfig,
    ReconnectPolicy, Session, Termination,
};

//! scatter-services — node logic for the six pipeline roles.
//!
//! Each role is a plain struct driven by the HTTP layer in `scatter-api`:
//! construct it from its config section, spawn its background tasks, and
//! feed it raw request bodies.

pub mod auth;
pub mod central;
pub mod client;
pub mod downstream;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod pending;
pub mod relay;
pub mod session;
pub mod upstream;

pub use auth::TokenRegistry;
pub use central::CentralNode;
pub use client::ProxyClient;
pub use downstream::DownstreamNode;
pub use error::PipelineError;
pub use forward::{ForwardError, Forwarder};
pub use gateway::{Gateway, ProxyRequest};
pub use pending::{PendingMap, ProxyResponse, RequestError};
pub use relay::RelayNode;
pub use session::{new_session_table, Session, SessionTable};
pub use upstream::UpstreamNode;

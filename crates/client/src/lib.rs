//! FleetChat Client Library
//!
//! This crate contains the ticket chat session engine: the HTTP API client,
//! the Pusher-protocol realtime transport and the per-conversation session.

pub mod api;
pub mod attachments;
pub mod auth;
pub mod badges;
pub mod config;
pub mod error;
pub mod playback;
pub mod present;
pub mod realtime;
pub mod session;
pub mod store;

pub use api::{ApiClient, ChatApi, OutgoingMessage};
pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use session::{mount, SessionDeps, SessionEvent, SessionHandle, SessionSnapshot};

//! Asynchronous HTTP client SDK for the Tractive pet-tracker REST API.
//!
//! Wraps the vendor's REST surface: the login handshake, tracker and pet
//! queries, position history, and the live event channel.
//!
//! # Example
//!
//! ```no_run
//! use tractive_client::TractiveClient;
//!
//! # async fn example() -> tractive_client::Result<()> {
//! let client = TractiveClient::builder()
//!     .email("user@example.com")
//!     .password("secret")
//!     .build()?;
//!
//! // List trackers (authenticates lazily on first use).
//! for tracker in client.trackers().list().await? {
//!     let report = client.trackers().hw_info(&tracker.id).await?;
//!     println!("{}: {report}", tracker.id);
//! }
//!
//! // Follow live events.
//! use futures::StreamExt;
//! let mut events = client.channel().listen();
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Behavior notes
//!
//! - Credentials are acquired lazily and refreshed proactively once they are
//!   within the configured skew of expiry.
//! - Rate-limited requests (429) are retried with exponential backoff and
//!   jitter; every other failure maps onto [`Error`] without retry.
//! - The event channel reconnects through local read timeouts but never
//!   restarts a session that ended with an error: call
//!   [`Channel::listen`](channel::Channel::listen) again instead.

pub mod api;
pub mod auth;
pub mod channel;
pub mod client;
pub mod error;
pub mod types;

pub use channel::{Channel, EventStream};
pub use client::{ClientBuilder, TractiveClient};
pub use error::{Error, Result};
pub use types::{ChannelEvent, Credentials, EntityRef, Payload};

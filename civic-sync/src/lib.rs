//! Civic Sync - Remote Synchronization
//!
//! Keeps a shared [`civic_store::EntityStore`] in step with the remote report
//! collection and routes local edits through it optimistically.
//!
//! - [`feed`]: change-feed subscriber with resync on reconnect
//! - [`mutation`]: optimistic mutation coordinator
//! - [`views`]: per-consumer filtered and map view models
//! - [`client`]: `SyncClient` facade
//! - [`rest`], [`ws`]: HTTP and WebSocket collaborators
//! - [`mock`]: in-memory remote for tests and demos

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod mock;
pub mod mutation;
pub mod remote;
pub mod rest;
pub mod views;
pub mod ws;

pub use client::{SyncClient, SyncSettings};
pub use config::{AuthConfig, ConfigError, ReconnectConfig, SyncConfig};
pub use error::{ClientError, ClientResult};
pub use feed::{ChangeFeed, FeedHandle, FeedStatus};
pub use mock::{MockRemote, WriteMode};
pub use mutation::{MutationAttempt, MutationCoordinator, MutationKind, MutationState};
pub use remote::{
    ChangeChannel, ChannelMessage, ReportFetcher, ReportWriter, Subscription, SubscriptionHandle,
};
pub use rest::RestClient;
pub use views::{FilteredView, MapView};
pub use ws::WsChannel;

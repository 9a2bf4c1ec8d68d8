//! # Host Bridge Traits
//!
//! Contracts between the mirror engine and the outside world.
//!
//! ## Overview
//!
//! The sync engine in `core-sync` never talks to a network, an image codec or
//! the wall clock directly. Each of those is a trait defined here and
//! implemented per platform (`bridge-desktop`, `provider-google-drive`) or by
//! fakes in tests.
//!
//! ## Traits
//!
//! - [`RemoteSource`](remote::RemoteSource) - list, download and upload against the remote store
//! - [`Transcoder`](transcode::Transcoder) - turn original bytes into a derivative
//! - [`HttpClient`](http::HttpClient) - async HTTP used by remote connectors
//! - [`Clock`](time::Clock) - time source for deterministic testing
//!
//! ## Error Handling
//!
//! Every trait reports failures as [`BridgeError`](error::BridgeError). The
//! distinction between [`BridgeError::Auth`] and [`BridgeError::Transient`]
//! matters: the first puts the whole system in maintenance, the second only
//! fails the current pass.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! across the concurrent derivative workers.

pub mod error;
pub mod http;
pub mod remote;
pub mod time;
pub mod transcode;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use remote::{RemoteItem, RemoteSource, FOLDER_MIME_TYPE};
pub use time::{Clock, SystemClock};
pub use transcode::{DerivativeProfile, TranscodedImage, Transcoder};

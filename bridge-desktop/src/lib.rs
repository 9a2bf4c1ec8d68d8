//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - [`ReqwestHttpClient`]: `HttpClient` on top of `reqwest` with retry and backoff
//! - [`ImageTranscoder`]: `Transcoder` decoding with `image` and encoding WebP with `webp`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ImageTranscoder, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let transcoder = Arc::new(ImageTranscoder::new());
//! ```

mod http;
mod transcoder;

pub use http::ReqwestHttpClient;
pub use transcoder::ImageTranscoder;

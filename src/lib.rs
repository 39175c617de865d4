//! Core library for music-stream-gateway
pub mod config;
pub mod error;
pub mod models;
pub mod api;
pub mod ident;
pub mod federator;
pub mod recovery;
pub mod transcode;
pub mod range;
pub mod server;
pub mod util;

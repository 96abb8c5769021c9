//! # meridian-node
//!
//! Control-plane core for the Meridian decentralized object-storage
//! network. Three subsystems make up the crate:
//!
//! - **Order settlement**: satellites accept signed bandwidth
//!   receipts from storage nodes over a streaming endpoint, verify
//!   their provenance, and persist them with exactly-once
//!   serial-number consumption ([`orders`]).
//! - **Node reputation**: an online Beta-distribution estimator per
//!   storage node drives sticky disqualification decisions
//!   ([`reputation`], [`overlay`]).
//! - **Piece download**: the uplink-side streaming reader negotiates
//!   incremental signed bandwidth allocations while delivering a byte
//!   stream under flow control ([`piecestore`]).
//!
//! Transports, databases, and satellite discovery are trait seams;
//! in-memory implementations ship for wiring and tests.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meridian_node::{FullIdentity, SatelliteBuilder, SatelliteConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = Arc::new(FullIdentity::generate());
//!     let satellite = SatelliteBuilder::new(identity, SatelliteConfig::default()).build();
//!     // serve settlement streams via satellite.endpoint() ...
//!     satellite.close().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod nodestats;
pub mod orders;
pub mod overlay;
pub mod peer;
pub mod piecestore;
pub mod pipe;
pub mod reputation;
pub mod trust;

pub use config::{
    PiecestoreConfig, ReputationConfig, SatelliteConfig, SenderConfig, SettlementConfig,
};
pub use error::{Error, Result};
pub use identity::{FullIdentity, NodeId, PeerIdentity};
pub use orders::db::{InmemoryOrdersDb, OrdersDb};
pub use orders::endpoint::Endpoint;
pub use orders::sender::{ArchivedOrder, OrderSender};
pub use orders::{Order, OrderLimit, PieceAction, PieceId, SerialNumber};
pub use overlay::Inmemory;
pub use peer::{RunningSatellite, SatelliteBuilder};
pub use piecestore::{Client as PiecestoreClient, Downloader};
pub use trust::TrustPool;

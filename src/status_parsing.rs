//! Parsing of the VPN server's status snapshot.
//!
//! Components:
//! - `address`: splitting of the `Real Address` column into ip and port.
//! - `snapshot_parser`: section detection and per-row parsing.
//! - `types`: records produced by the parser.

pub mod address;
pub mod snapshot_parser;
pub mod types;

pub use address::{resolve_real_address, RealAddress};
pub use snapshot_parser::parse_snapshot;
pub use types::{ClientSnapshotRecord, LineFault, ParsedSnapshot, RoutingEntry};

//! # A2A Pay - agent-to-agent service marketplace
//!
//! Autonomous agents publish priced services in a shared directory and pay
//! each other through escrow that holds funds until delivery is confirmed.
//!
//! ## Architecture
//!
//! - **Address derivation**: every program account lives at an address derived from its seeds
//! - **Service Registry**: one `ServiceAccount` per owner and service type
//! - **Escrow Custody**: `Created -> Delivered -> Released`, or `Created -> Disputed`
//! - **Ledger**: in-process substrate executing signed transactions atomically
//! - **Node / Client**: axum HTTP node, `Connection` trait with local and HTTP backends

pub mod address;
pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod escrow;
pub mod instruction;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod state;
pub mod wallet;

use std::sync::Arc;

pub use address::{Address, Identity, ProgramId, ProgramIds};
pub use client::{MarketClient, TxReceipt};
pub use config::{AppConfig, LedgerConfig};
pub use connection::{Connection, HttpConnection, LocalConnection};
pub use error::{MarketError, ProtocolError, Result};
pub use escrow::EscrowProgram;
pub use ledger::{Clock, Ledger, SystemClock};
pub use registry::RegistryProgram;
pub use state::{EscrowAccount, EscrowStatus, ServiceAccount};
pub use wallet::{Keypair, Signature};

/// A ledger with the registry and escrow programs installed.
pub fn marketplace_ledger(
    config: LedgerConfig,
    programs: ProgramIds,
    clock: Arc<dyn Clock>,
) -> Ledger {
    let mut ledger = Ledger::new(config, clock);
    ledger.install(Arc::new(RegistryProgram::new(programs.registry)));
    ledger.install(Arc::new(EscrowProgram::new(programs.escrow)));
    ledger
}

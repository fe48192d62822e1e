//! A metered chat client: a conversation ledger with tiered token pricing
//! and a single-flight request lifecycle over a remote language model.

// Public modules
pub mod account;
pub mod chat;
pub mod controller;
pub mod error;
pub mod gemini;
pub mod ledger;
pub mod persistence;
pub mod pricing;
pub mod remote;

mod observability;

// Re-exports
pub use account::SessionAccount;
pub use controller::{
    DEFAULT_TIMEOUT, LedgerEntryView, PendingTurn, RequestLifecycleController, RequestState,
    TurnOutcome, TurnReceipt,
};
pub use error::{Error, Result};
pub use gemini::{GeminiClient, GeminiService, GeminiSettings};
pub use ledger::{Ledger, Message, RemovalReport, Role, Speaker, Turn, content_preview};
pub use observability::register_biometrics;
pub use persistence::{ExportFormat, SessionFile, StoredSystemInstruction, StoredTurn};
pub use pricing::{PricingTable, TierRate, cost};
pub use remote::{RemoteService, Reply};

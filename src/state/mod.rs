/// State management module
///
/// This module handles all application state, including:
/// - Database connections and queries (library.rs)
/// - Shared data structures (data.rs)
/// - Bounded undo/redo stacks (history.rs)
/// - Optimistic credit accounting (ledger.rs)
/// - The shared id-indexed entity map (workspace.rs)

pub mod data;
pub mod history;
pub mod ledger;
pub mod library;
pub mod workspace;

pub use data::{Credits, GenerationJob, ImageEntity, JobStatus, QualityTier, Row};
pub use ledger::{CreditLedger, Debit, LedgerUpdate, Role};
pub use library::{Library, RecordStore};
pub use workspace::Workspace;

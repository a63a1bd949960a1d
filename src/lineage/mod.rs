/// Lineage module
///
/// This module turns flat catalog records into displayable version rows:
/// - Parent-chain walking and row grouping (grouper.rs)
/// - Focus tracking across the grouped rows (navigator.rs)

pub mod grouper;
pub mod navigator;

pub use grouper::{GroupOutcome, LineageGrouper, RootKey};
pub use navigator::{Direction, SelectionNavigator};

//! Control layer exposing driver management and stream state to tooling.

/// Host-level driver management and status queries.
pub mod api;
/// Ratatui-based monitor console.
pub mod ui;

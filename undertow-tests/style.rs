//! Style Enforcement Tests
//!
//! Scans the workspace for patterns clippy does not catch on its own.
//!
//! - `production_code` - No dead-code allowances and no panicking unwraps
//!   outside test code

#[path = "style/production_code.rs"]
mod production_code;

//! Output formatting
//!
//! - `pgm`: input images and grid snapshots
//! - `text`: console events and summary
//! - `json`: machine-readable run summary

pub mod json;
pub mod pgm;
pub mod text;

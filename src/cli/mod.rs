#![forbid(unsafe_code)]

//! Command-line interface utilities and data import/export functionality.

/// Observation CSV import and metadata snapshot export.
pub mod import_export;

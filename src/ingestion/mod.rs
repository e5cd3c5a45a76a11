//! Ingestion entrypoints and implementations.
//!
//! Most callers should use [`ingest_sheets`] (from [`unified`]) which:
//!
//! - reads a directory of CSV files, a single CSV file or (feature `excel`) a workbook
//! - keeps every cell as raw text in a [`crate::types::Sheet`]
//! - optionally reports success/failure/alerts to an [`IngestionObserver`]
//!
//! Format-specific functions are also available under [`csv`] and, with the `excel` feature,
//! `excel`.

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod observability;
pub mod unified;

pub use observability::{
    CompositeObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats, TracingObserver,
};
pub use unified::{ingest_sheets, IngestionFormat, IngestionOptions};

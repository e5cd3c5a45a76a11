//! `clinical-etl` maps tabular clinical data (a directory of CSV files, a single CSV file or a
//! workbook) onto a nested JSON schema, one output tree per subject.
//!
//! The primary entrypoint is [`convert::Conversion`], driven by a YAML [`manifest::Manifest`].
//! The individual stages are public too:
//!
//! 1. [`ingestion::ingest_sheets`] reads raw sheets; every cell is a string or null.
//! 2. [`consolidate::consolidate`] groups all sheets by the subject identifier column into an
//!    [`types::IndexedData`].
//! 3. [`schema::SchemaDocument::template`] generates a default mapping template from a JSON
//!    Schema / OpenAPI document; [`template::Template`] parses hand-edited ones.
//! 4. [`template::compile`] turns a template into a [`template::ScaffoldNode`] tree with every
//!    mapping function resolved through a [`functions::FunctionRegistry`].
//! 5. [`evaluate::Evaluator`] walks the scaffold for each subject, optionally in parallel via
//!    [`execution::ExecutionEngine`].
//! 6. [`validation::ValidationEngine`] checks the output trees structurally (JSON Schema) and
//!    semantically (per-kind rules such as the built-in [`validation::moh`] profile).
//!
//! ## Mapping templates
//!
//! One line per output field: a dot-separated path and an expression. `INDEX` marks the element
//! of an array and is bound to an index function; a `*` suffix marks a required field and `+` an
//! ontology term (both informational).
//!
//! ```text
//! submitter_donor_id*, {single_val(Donor.id)}
//! primary_diagnoses.INDEX, {indexed_on(Diagnosis.dx_id)}
//! primary_diagnoses.INDEX.primary_site, {single_val(primary_site)}
//! primary_diagnoses.INDEX.date_of_diagnosis, {single_date(diagnosis_date)}
//! primary_diagnoses.INDEX.grade, "##not mapped"
//! ```
//!
//! A bare field name is shorthand for `{single_val(field)}`.
//!
//! ## Quick example: map in memory
//!
//! ```rust
//! use clinical_etl::consolidate::consolidate;
//! use clinical_etl::evaluate::Evaluator;
//! use clinical_etl::functions::FunctionRegistry;
//! use clinical_etl::template::{compile, Template};
//! use clinical_etl::types::Sheet;
//!
//! # fn main() -> Result<(), clinical_etl::EtlError> {
//! let data = consolidate(
//!     &[
//!         Sheet::from_strs("Donor", &["id", "sex"], &[&["D1", "Female"]]),
//!         Sheet::from_strs("Diagnosis", &["id", "dx_id", "site"], &[&["D1", "DX1", "Lung"]]),
//!     ],
//!     "id",
//! )?;
//! let template = Template::parse(
//!     "sex, {single_val(sex)}\n\
//!      dx.INDEX, {indexed_on(dx_id)}\n\
//!      dx.INDEX.site, site",
//! )?;
//! let scaffold = compile(&template, &FunctionRegistry::with_builtins())?;
//!
//! let outcome = Evaluator::new(&scaffold, &data).evaluate("D1")?;
//! assert_eq!(
//!     outcome.packet.unwrap(),
//!     serde_json::json!({"sex": "Female", "dx": [{"site": "Lung"}]})
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Quick example: run a manifest
//!
//! ```no_run
//! use clinical_etl::convert::{write_artifacts, Conversion};
//! use clinical_etl::manifest::Manifest;
//!
//! # fn main() -> Result<(), clinical_etl::EtlError> {
//! let manifest = Manifest::from_path("manifest.yml")?;
//! let output = Conversion::new(manifest).run("raw_data")?;
//! write_artifacts(&output, std::path::Path::new("raw_data"))?;
//! println!("errors={}", output.report.errors.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: format-specific readers behind one entrypoint, with observer hooks
//! - [`types`]: raw sheets and the subject-keyed indexed data
//! - [`functions`]: the mapping function library and registry
//! - [`template`], [`schema`]: mapping templates and schema introspection
//! - [`evaluate`], [`execution`]: per-subject evaluation and the parallel runner
//! - [`validation`], [`coverage`]: checks on the output and on template coverage
//! - [`error`]: error types used across the crate

pub mod consolidate;
pub mod convert;
pub mod coverage;
pub mod error;
pub mod evaluate;
pub mod execution;
pub mod functions;
pub mod ingestion;
pub mod manifest;
pub mod schema;
pub mod template;
pub mod types;
pub mod validation;

pub use error::{EtlError, EtlResult, MappingError};

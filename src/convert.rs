//! End-to-end conversion: ingest, consolidate, compile, evaluate, validate.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::consolidate::consolidate;
use crate::coverage::{sheet_usage, UsageReport};
use crate::error::EtlResult;
use crate::evaluate::{Evaluator, MappingDiagnostic};
use crate::execution::{ExecutionEngine, ExecutionObserver, ExecutionOptions, TracingExecutionObserver};
use crate::functions::FunctionRegistry;
use crate::ingestion::{ingest_sheets, IngestionObserver, IngestionOptions, TracingObserver};
use crate::manifest::Manifest;
use crate::schema::SchemaDocument;
use crate::template::{compile, Template};
use crate::types::IndexedData;
use crate::validation::{
    FieldCoverage, JsonSchemaValidator, RuleRegistry, ValidationEngine, ValidationReport, ValidationSchema,
};

/// Everything a conversion produced.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub indexed: IndexedData,
    /// One output tree per subject that was not dropped, in subject order.
    pub packets: Vec<Value>,
    /// Subjects dropped under the `subject` mapping error policy.
    pub dropped: Vec<String>,
    pub diagnostics: Vec<MappingDiagnostic>,
    pub report: ValidationReport,
    pub usage: UsageReport,
}

/// The `_summary.json` artifact.
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub subjects: usize,
    pub dropped: &'a [String],
    pub diagnostics: &'a [MappingDiagnostic],
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub coverage: &'a BTreeMap<String, BTreeMap<String, FieldCoverage>>,
    pub identifiers: &'a BTreeMap<String, BTreeMap<String, usize>>,
    pub usage: &'a UsageReport,
}

impl ConversionOutput {
    pub fn summary(&self) -> Summary<'_> {
        Summary {
            subjects: self.indexed.subject_count(),
            dropped: &self.dropped,
            diagnostics: &self.diagnostics,
            errors: self.report.errors.iter().map(ToString::to_string).collect(),
            warnings: self.report.warnings.iter().map(ToString::to_string).collect(),
            coverage: &self.report.coverage,
            identifiers: &self.report.identifiers,
            usage: &self.usage,
        }
    }
}

/// A configured conversion run.
pub struct Conversion {
    manifest: Manifest,
    registry: FunctionRegistry,
    execution: ExecutionOptions,
    ingestion_observer: Arc<dyn IngestionObserver>,
    execution_observer: Arc<dyn ExecutionObserver>,
}

impl Conversion {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            registry: FunctionRegistry::with_builtins(),
            execution: ExecutionOptions::default(),
            ingestion_observer: Arc::new(TracingObserver),
            execution_observer: Arc::new(TracingExecutionObserver),
        }
    }

    /// Use `registry` instead of the built-in library, e.g. to add plugin modules.
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionOptions) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_ingestion_observer(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.ingestion_observer = observer;
        self
    }

    pub fn with_execution_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.execution_observer = observer;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The effective mapping template: the schema's default template with the manifest's
    /// mapping lines merged in, or the mapping alone when no schema is configured.
    pub fn template(&self, schema: Option<&SchemaDocument>) -> EtlResult<Template> {
        let mapping = Template::from_path(self.manifest.template_path()?)?;
        match schema {
            Some(doc) => {
                let mut template = doc.template(self.manifest.schema_name.as_deref())?;
                template.interpolate(&mapping);
                Ok(template)
            }
            None => Ok(mapping),
        }
    }

    /// Run the conversion over `input` (a directory of CSV files, a CSV file or a workbook).
    ///
    /// Configuration problems fail before any data is read. Validation findings never fail the
    /// run; they are returned in [`ConversionOutput::report`].
    pub fn run(&self, input: impl AsRef<Path>) -> EtlResult<ConversionOutput> {
        let input = input.as_ref();
        self.manifest.check_plugins(&self.registry)?;
        let identifier = self.manifest.identifier()?;

        let schema = self
            .manifest
            .schema_path()
            .map(SchemaDocument::from_path)
            .transpose()?;
        let template = self.template(schema.as_ref())?;
        let scaffold = compile(&template, &self.registry)?;
        let profile = self.manifest.validation_profile()?;
        let structural = match &schema {
            Some(doc) => Some(JsonSchemaValidator::new(
                &doc.json_schema(self.manifest.schema_name.as_deref())?,
            )?),
            None => None,
        };

        info!(input = %input.display(), "reading raw data");
        let sheets = ingest_sheets(
            input,
            &IngestionOptions {
                indexed: self.manifest.indexed.clone(),
                observer: Some(Arc::clone(&self.ingestion_observer)),
                ..Default::default()
            },
        )?;

        info!(sheets = sheets.len(), "indexing data");
        let indexed = consolidate(&sheets, identifier)?;

        let usage = sheet_usage(&scaffold, &indexed);
        for field in &usage.unknown_fields {
            warn!(field = %field, "template field not found in any sheet");
        }

        let engine = ExecutionEngine::new(self.execution.clone())?
            .with_observer(Arc::clone(&self.execution_observer));
        let evaluator = Evaluator::new(&scaffold, &indexed).with_policy(self.manifest.mapping_errors);
        let outcomes = engine.run(&evaluator, &indexed.subjects)?;

        let mut packets = Vec::with_capacity(outcomes.len());
        let mut dropped = Vec::new();
        let mut diagnostics = Vec::new();
        for outcome in outcomes {
            diagnostics.extend(outcome.diagnostics);
            match outcome.packet {
                Some(packet) => packets.push(packet),
                None => dropped.push(outcome.subject),
            }
        }

        let (validation_schema, rules) =
            profile.unwrap_or_else(|| (ValidationSchema::structural_only(), RuleRegistry::new()));
        let mut validator = ValidationEngine::new(&validation_schema, &rules);
        if let Some(structural) = &structural {
            validator = validator.with_structural(structural);
        }
        let report = validator.validate(&packets);

        Ok(ConversionOutput {
            indexed,
            packets,
            dropped,
            diagnostics,
            report,
            usage,
        })
    }
}

/// Default artifact stem for an input path: the path without its extension.
pub fn output_stem(input: &Path) -> PathBuf {
    if input.is_dir() {
        // drops a trailing separator
        input.components().collect()
    } else {
        input.with_extension("")
    }
}

fn artifact_path(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn write_json(path: &Path, value: &impl Serialize) -> EtlResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write `<stem>_map.json`, `<stem>_indexed.json` and `<stem>_summary.json`.
pub fn write_artifacts(output: &ConversionOutput, stem: &Path) -> EtlResult<Vec<PathBuf>> {
    let map = artifact_path(stem, "_map.json");
    let indexed = artifact_path(stem, "_indexed.json");
    let summary = artifact_path(stem, "_summary.json");

    write_json(&map, &output.packets)?;
    write_json(&indexed, &output.indexed)?;
    write_json(&summary, &output.summary())?;
    info!(path = %map.display(), packets = output.packets.len(), "wrote output");
    Ok(vec![map, indexed, summary])
}

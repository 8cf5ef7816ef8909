//! Model Weaver
//!
//! A schema-weaving compiler pass for persistable data models. Reads a
//! compiled module, finds the persistable types, validates their declared
//! model, derives one schema descriptor per type and rewrites property
//! accessors so that managed instances read and write through the storage
//! container while unmanaged instances keep plain field semantics.
//!
//! ## Pipeline
//!
//! ```text
//! ModuleResolver ──► TypeGraphAnalyzer ──► PropertyClassifier ──► ConstraintValidator
//!   (graph::loader)     (graph)              (graph::classify)       (lint)
//!                                                                       │
//!          HelperEmitter ◄── AccessorRewriter ◄── SchemaBuilder ◄── BackingFieldLocator
//!          (codegen::helper)  (codegen::rewrite)  (codegen::schema)  (codegen::backing)
//! ```
//!
//! `weave_module` is the build-tool entry point: it loads the module, weaves
//! it and writes the output only when no error was recorded.

pub mod checksum;
pub mod codegen;
pub mod config;
pub mod error;
pub mod exec;
pub mod graph;
pub mod lint;
pub mod module;
pub mod wellknown;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use checksum::Checksum;
pub use codegen::{weave, SchemaDescriptor, SchemaField, WeaveResult, WeaveSettings, WeaveStats};
pub use config::WeaverConfig;
pub use error::{Result, WeaveError};
pub use graph::{Diagnostics, ModuleResolver, StorageCategory, Variant};
pub use module::Module;

/// Inputs of one build-tool invocation
#[derive(Debug, Clone, Default)]
pub struct WeaveOptions {
    /// Module to weave
    pub module_path: PathBuf,
    /// Where the woven module goes
    pub output_path: PathBuf,
    /// Dependency search paths, added to the configured ones
    pub search_paths: Vec<PathBuf>,
    /// Where the schema descriptors go; `<output>.schema.json` when unset
    pub schema_output: Option<PathBuf>,
    pub config: WeaverConfig,
}

/// Result of one build-tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaveOutcome {
    /// True when the output was written
    pub success: bool,
    pub diagnostics: Diagnostics,
    pub schemas: Vec<SchemaDescriptor>,
    pub stats: WeaveStats,
    pub input_checksum: Checksum,
    /// Checksum of the woven module, when written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_checksum: Option<Checksum>,
}

impl WeaveOutcome {
    /// True when the weave left the module unchanged
    pub fn unchanged(&self) -> bool {
        self.output_checksum.as_ref() == Some(&self.input_checksum)
    }
}

/// Default schema file for an output module
pub fn schema_path_for(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(".module.json").trim_end_matches(".json").to_string())
        .unwrap_or_else(|| "module".to_string());
    output.with_file_name(format!("{}.schema.json", name))
}

/// Load, weave and (on success) write a module.
///
/// Fails outright only when the module cannot be read or the root markers
/// cannot be resolved; every model problem is reported in the outcome.
pub fn weave_module(options: &WeaveOptions) -> Result<WeaveOutcome> {
    let load_config = options.config.load_config(&options.search_paths);
    let resolver = ModuleResolver::open(&options.module_path, &load_config)?;
    resolver.check_root_markers()?;

    let input_checksum = Checksum::of_module(resolver.target());
    let result = weave(&resolver, &options.config.weave_settings());

    let success = !result.diagnostics.has_errors();
    let mut output_checksum = None;

    if success {
        let pretty = options.config.output.format.is_pretty();
        write_file(&options.output_path, &result.module.to_json(pretty)?)?;
        output_checksum = Some(Checksum::of_module(&result.module));

        if options.config.output.write_schema {
            let schema_path = options
                .schema_output
                .clone()
                .unwrap_or_else(|| schema_path_for(&options.output_path));
            let schemas = if pretty {
                serde_json::to_string_pretty(&result.schemas)?
            } else {
                serde_json::to_string(&result.schemas)?
            };
            write_file(&schema_path, &schemas)?;
        }

        info!(
            module = %result.module.name,
            output = %options.output_path.display(),
            types = result.stats.types_woven,
            properties = result.stats.properties_woven,
            "weave complete"
        );
    } else {
        warn!(
            module = %result.module.name,
            errors = result.diagnostics.error_count(),
            "weave failed, output not written"
        );
    }

    Ok(WeaveOutcome {
        success,
        diagnostics: result.diagnostics,
        schemas: result.schemas,
        stats: result.stats,
        input_checksum,
        output_checksum,
    })
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| WeaveError::OutputWrite {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, content).map_err(|source| WeaveError::OutputWrite {
        path: path.to_path_buf(),
        source,
    })
}

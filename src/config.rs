//! Configuration management for the weaver
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (weaver.toml)
//! - Environment variables (WEAVER__*)
//!
//! ## Example config file (weaver.toml):
//! ```toml
//! [resolver]
//! search_paths = ["./build/modules", "./vendor/modules"]
//! module_extension = "module.json"
//! embedded_runtime = true
//!
//! [output]
//! format = "pretty"
//! write_schema = true
//!
//! [diagnostics]
//! warnings_as_errors = false
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codegen::WeaveSettings;
use crate::graph::LoadConfig;

/// Main configuration for the weaver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeaverConfig {
    /// Dependency resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Diagnostic policy
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Directories searched for dependency modules
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Suffix of module files
    #[serde(default = "default_module_extension")]
    pub module_extension: String,

    /// Fall back to the runtime module built into the weaver
    #[serde(default = "default_true")]
    pub embedded_runtime: bool,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format (pretty or compact)
    #[serde(default)]
    pub format: OutputFormat,

    /// Write `<output>.schema.json` next to the woven module
    #[serde(default = "default_true")]
    pub write_schema: bool,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

impl OutputFormat {
    pub fn is_pretty(&self) -> bool {
        matches!(self, OutputFormat::Pretty)
    }
}

/// Diagnostic policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Fail the build on warnings too
    #[serde(default)]
    pub warnings_as_errors: bool,
}

fn default_true() -> bool {
    true
}

fn default_module_extension() -> String {
    "module.json".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            module_extension: default_module_extension(),
            embedded_runtime: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
            write_schema: true,
        }
    }
}

impl WeaverConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding an explicit file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["weaver.toml", ".weaver.toml", "config/weaver.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "model-weaver", "weaver") {
            let xdg_config = config_dir.config_dir().join("weaver.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        // WEAVER__DIAGNOSTICS__WARNINGS_AS_ERRORS=true
        builder = builder.add_source(
            Environment::with_prefix("WEAVER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Resolver settings, with extra search paths appended
    pub fn load_config(&self, extra_search_paths: &[PathBuf]) -> LoadConfig {
        let mut search_paths = self.resolver.search_paths.clone();
        search_paths.extend(extra_search_paths.iter().cloned());
        LoadConfig {
            search_paths,
            module_extension: self.resolver.module_extension.clone(),
            embedded_runtime: self.resolver.embedded_runtime,
        }
    }

    pub fn weave_settings(&self) -> WeaveSettings {
        WeaveSettings {
            warnings_as_errors: self.diagnostics.warnings_as_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WeaverConfig::default();
        assert!(config.resolver.embedded_runtime);
        assert_eq!(config.resolver.module_extension, "module.json");
        assert!(config.output.format.is_pretty());
        assert!(!config.diagnostics.warnings_as_errors);
    }

    #[test]
    fn test_serialize_config() {
        let config = WeaverConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[resolver]"));
        assert!(toml_str.contains("[output]"));
        assert!(toml_str.contains("[diagnostics]"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[resolver]\nsearch_paths = [\"deps\"]\n\n[output]\nformat = \"compact\"\n\n[diagnostics]\nwarnings_as_errors = true\n",
        )
        .unwrap();

        let config = WeaverConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.resolver.search_paths, vec![PathBuf::from("deps")]);
        assert_eq!(config.output.format, OutputFormat::Compact);
        assert!(config.weave_settings().warnings_as_errors);

        let load = config.load_config(&[PathBuf::from("more")]);
        assert_eq!(load.search_paths.len(), 2);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weaver.toml");
        let mut config = WeaverConfig::default();
        config.output.write_schema = false;
        config.save(&path).unwrap();

        let loaded = WeaverConfig::load_from(Some(&path)).unwrap();
        assert!(!loaded.output.write_schema);
    }
}

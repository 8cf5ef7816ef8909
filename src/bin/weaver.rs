//! Model Weaver CLI
//!
//! Weaves modules, prints schemas and exports the type hierarchy.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use model_weaver::config::WeaverConfig;
use model_weaver::graph::{LoadConfig, TypeGraphAnalyzer};
use model_weaver::{weave, weave_module, ModuleResolver, WeaveOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "model-weaver")]
#[command(about = "Weave persistence into compiled data-model modules")]
struct Cli {
    /// Configuration file (defaults to weaver.toml lookup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra dependency search path (repeatable)
    #[arg(short = 'I', long = "search-path", global = true)]
    search_paths: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Weave a module and write the result
    Weave {
        /// Module to weave
        module: PathBuf,
        /// Output module path
        #[arg(short, long)]
        output: PathBuf,
        /// Schema output path (defaults to <output>.schema.json)
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
        /// Write a JSON report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the schema descriptors of a module without writing anything
    Schema {
        module: PathBuf,
    },

    /// Export the walked type hierarchy as Graphviz DOT
    Graph {
        module: PathBuf,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default weaver.toml
    Init {
        #[arg(default_value = "weaver.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = WeaverConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Weave { module, output, schema, strict, report } => {
            let mut config = config;
            config.diagnostics.warnings_as_errors |= strict;
            let options = WeaveOptions {
                module_path: module,
                output_path: output,
                search_paths: cli.search_paths,
                schema_output: schema,
                config,
            };

            println!("🧵 Weaving {}", options.module_path.display());
            let outcome = weave_module(&options)?;

            if !outcome.diagnostics.is_empty() {
                println!("\n{}", outcome.diagnostics);
            }

            if let Some(path) = report {
                let report = serde_json::json!({
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                    "module": options.module_path,
                    "output": options.output_path,
                    "outcome": outcome,
                });
                std::fs::write(&path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                println!("📄 Report written to {}", path.display());
            }

            if outcome.success {
                println!(
                    "✅ Woven {} type(s), {} propert(ies) -> {}",
                    outcome.stats.types_woven,
                    outcome.stats.properties_woven,
                    options.output_path.display()
                );
                if outcome.unchanged() {
                    println!("   (module already woven, no changes)");
                }
                Ok(0)
            } else {
                eprintln!("❌ Weave failed with {} error(s), nothing written", outcome.diagnostics.error_count());
                Ok(1)
            }
        }

        Commands::Schema { module } => {
            let resolver = open_resolver(&module, &config, &cli.search_paths)?;
            let result = weave(&resolver, &config.weave_settings());
            println!("{}", serde_json::to_string_pretty(&result.schemas)?);
            if !result.diagnostics.is_empty() {
                eprintln!("{}", result.diagnostics);
            }
            Ok(if result.diagnostics.has_errors() { 1 } else { 0 })
        }

        Commands::Graph { module, output } => {
            let resolver = open_resolver(&module, &config, &cli.search_paths)?;
            let analyzer = TypeGraphAnalyzer::new(&resolver);
            let types = analyzer.target_types();
            let dot = analyzer.to_dot();

            match output {
                Some(path) => {
                    std::fs::write(&path, &dot).with_context(|| format!("writing {}", path.display()))?;
                    println!("✅ Exported hierarchy of {} type(s) to {}", types.len(), path.display());
                }
                None => print!("{}", dot),
            }
            Ok(0)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(0)
            }
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                WeaverConfig::default().save(&path)?;
                println!("✅ Wrote {}", path.display());
                Ok(0)
            }
        },
    }
}

fn open_resolver(module: &Path, config: &WeaverConfig, search_paths: &[PathBuf]) -> anyhow::Result<ModuleResolver> {
    let load_config: LoadConfig = config.load_config(search_paths);
    let resolver = ModuleResolver::open(module, &load_config)
        .with_context(|| format!("loading {}", module.display()))?;
    resolver.check_root_markers()?;
    Ok(resolver)
}

//! Testie inspection CLI
//!
//! Loads a testie the way a run would (tags, overrides, node table) and
//! prints what the run would see.
//!
//! # Usage
//!
//! ```bash
//! # Sections found in a testie
//! testie_cli sections udp.testie
//!
//! # Rows of the variable matrix, shuffled, with an override
//! testie_cli --expand shuffle --variables 'SIZE={64,1500}' matrix udp.testie
//!
//! # Scripts resolved for the third row
//! testie_cli --settings npf.yaml scripts udp.testie --row 2
//!
//! # Effective configuration as JSON
//! testie_cli --format json -c n_runs=1 config udp.testie
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use testie::{NodeResolver, Row, RunSettings, Testie};

#[derive(Parser)]
#[command(name = "testie_cli")]
#[command(version = "0.1.0")]
#[command(about = "Inspect testie files: sections, matrix rows, resolved scripts and config")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Run settings file (falls back to NPF_SETTINGS, then ./npf.yaml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Active tags, comma separated (repeatable)
    #[arg(long, global = true)]
    tags: Vec<String>,

    /// Variable override `name=value` (repeatable)
    #[arg(long, short = 'v', global = true)]
    variables: Vec<String>,

    /// Config override `name=value` (repeatable)
    #[arg(long, short = 'c', global = true)]
    config: Vec<String>,

    /// Expansion mode: brute or shuffle
    #[arg(long, global = true)]
    expand: Option<String>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// List the sections of a testie
    Sections {
        /// Testie file
        testie: PathBuf,
    },

    /// Print every row of the variable matrix, late variables applied
    Matrix {
        /// Testie file
        testie: PathBuf,
    },

    /// Print scripts and files resolved for every row
    Scripts {
        /// Testie file
        testie: PathBuf,

        /// Only this row of the matrix
        #[arg(long)]
        row: Option<usize>,
    },

    /// Print the effective configuration
    Config {
        /// Testie file
        testie: PathBuf,
    },
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
            } else {
                eprintln!("{}: {:#}", "error".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = RunSettings::discover(cli.settings.as_deref())?;
    settings.merge_cli(&cli.tags, &cli.variables, &cli.config, cli.expand);

    match cli.command {
        Commands::Sections { testie } => {
            cmd_sections(&settings.load_testie(&testie)?, cli.format)
        }
        Commands::Matrix { testie } => {
            cmd_matrix(&settings, &settings.load_testie(&testie)?, cli.format)
        }
        Commands::Scripts { testie, row } => {
            cmd_scripts(&settings, &settings.load_testie(&testie)?, row, cli.format)
        }
        Commands::Config { testie } => cmd_config(&settings.load_testie(&testie)?, cli.format),
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn cmd_sections(testie: &Testie, format: OutputFormat) -> Result<()> {
    let variables: Vec<_> = testie
        .variables()
        .iter()
        .map(|(name, domain)| (name.to_string(), domain.count()))
        .collect();
    let scripts: Vec<_> = testie
        .scripts
        .iter()
        .map(|s| s.display_name(true))
        .collect();
    let files: Vec<_> = testie
        .init_files
        .iter()
        .chain(&testie.files)
        .map(|f| f.filename.clone())
        .collect();
    let imports: Vec<_> = testie
        .imports
        .iter()
        .map(|i| i.module.clone())
        .collect();
    let missing = testie.missing_required_tags();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "name": testie.name,
                "title": testie.title(),
                "info": testie.info,
                "variables": variables,
                "matrix_size": testie.variables().matrix_size(),
                "late_variables": testie.late_variables.len(),
                "scripts": scripts,
                "files": files,
                "imports": imports,
                "requirements": testie.requirements.len(),
                "missing_tags": missing,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("{} {}", testie.title().bold(), format!("({})", testie.name).dimmed());
            if let Some(info) = &testie.info {
                println!("  {}", info.trim());
            }
            println!(
                "  variables: {} ({} rows)",
                variables.len(),
                testie.variables().matrix_size()
            );
            for (name, count) in &variables {
                println!("    {} x{}", name.cyan(), count);
            }
            if !testie.late_variables.is_empty() {
                println!("  late variable sections: {}", testie.late_variables.len());
            }
            for script in &scripts {
                println!("  script {}", script.green());
            }
            for file in &files {
                println!("  file {}", file);
            }
            for module in &imports {
                println!("  import {}", module);
            }
            if !testie.requirements.is_empty() {
                println!("  requirements: {}", testie.requirements.len());
            }
            if !missing.is_empty() {
                println!("  {} missing tags: {}", "!".yellow(), missing.join(", "));
            }
        }
    }
    Ok(())
}

fn cmd_matrix(settings: &RunSettings, testie: &Testie, format: OutputFormat) -> Result<()> {
    let rows = testie.rows(settings.expand_mode())?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            for (i, row) in rows.iter().enumerate() {
                println!("[{}] {}", i, row_line(row));
            }
            println!("{} {} row(s)", "OK".green(), rows.len());
        }
    }
    Ok(())
}

fn cmd_scripts(
    settings: &RunSettings,
    testie: &Testie,
    only: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let rows = testie.rows(settings.expand_mode())?;
    let selected: Vec<(usize, &Row)> = match only {
        Some(index) => match rows.get(index) {
            Some(row) => vec![(index, row)],
            None => bail!("row {} out of range, the matrix has {} row(s)", index, rows.len()),
        },
        None => rows.iter().enumerate().collect(),
    };
    let nodes: Option<&dyn NodeResolver> = if settings.nodes.is_empty() {
        None
    } else {
        Some(&settings.nodes)
    };

    let mut output = Vec::with_capacity(selected.len());
    for (index, row) in selected {
        let scripts = testie.resolve_scripts(row, nodes)?;
        let files = testie.resolve_files(row, nodes)?;
        match format {
            OutputFormat::Json => output.push(serde_json::json!({
                "index": index,
                "row": row,
                "scripts": scripts,
                "files": files,
            })),
            OutputFormat::Text => {
                println!("{} {}", format!("[{}]", index).bold(), row_line(row).dimmed());
                for text in scripts.iter().chain(&files) {
                    println!("{} {}", "#".cyan(), text.name.bold());
                    print!("{}", text.content);
                }
            }
        }
    }
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

fn cmd_config(testie: &Testie, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&testie.config().to_json()?)?);
        }
        OutputFormat::Text => {
            for (name, domain) in testie.config().variables().iter() {
                let values: Vec<String> = domain.values().iter().map(|v| v.to_string()).collect();
                println!("{} = {}", name.cyan(), values.join(", "));
            }
        }
    }
    Ok(())
}

fn row_line(row: &Row) -> String {
    row.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

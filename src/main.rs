//! Tether CLI - render and check live-binding templates

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tether::{FixSuggestion, Program, TemplateSource, TetherError, Value, View, ViewConfig};
use tokio::task::LocalSet;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - live-binding template engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template to markup
    Render {
        /// Template path (relative to --root when given)
        template: String,

        /// JSON file with the data to render
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Directory template paths are resolved against
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// YAML view configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Engine to use when the path has no recognised extension
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Compile templates and report parse errors
    Check {
        /// Files or glob patterns
        #[arg(required = true)]
        patterns: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let local = LocalSet::new();
    let result = local
        .run_until(async move {
            match cli.command {
                Commands::Render {
                    template,
                    data,
                    root,
                    config,
                    engine,
                } => render(&template, data, root, config, engine).await,
                Commands::Check { patterns } => check(&patterns),
            }
        })
        .await;

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e
            .downcast_ref::<TetherError>()
            .and_then(FixSuggestion::fix_suggestion)
        {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn render(
    template: &str,
    data: Option<PathBuf>,
    root: Option<PathBuf>,
    config: Option<PathBuf>,
    engine: Option<String>,
) -> Result<()> {
    let config = match config {
        Some(path) => ViewConfig::from_file(&path)?.with_env(),
        None => ViewConfig::from_env(),
    };

    // Without --root the template's own directory is the root.
    let (config, path) = match root {
        Some(root) => (config.with_root(root), template.to_string()),
        None => {
            let file = Path::new(template);
            let dir = file.parent().filter(|d| !d.as_os_str().is_empty());
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| template.to_string());
            match dir {
                Some(dir) => (config.with_root(dir), name),
                None => (config, template.to_string()),
            }
        }
    };

    let data = match data {
        Some(file) => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading data file {}", file.display()))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing data file {}", file.display()))?;
            Value::from(json)
        }
        None => Value::Undefined,
    };

    let source = match engine {
        Some(engine) => TemplateSource::url_with_engine(path, engine),
        None => TemplateSource::url(path),
    };

    let view = View::new(config);
    let rendered = view.render(source, data).await?;
    println!("{}", rendered.fragment.inner_html());
    Ok(())
}

fn check(patterns: &[String]) -> Result<()> {
    let mut files = Vec::new();
    for pattern in patterns {
        let matches: Vec<PathBuf> = glob::glob(pattern)
            .with_context(|| format!("invalid pattern '{pattern}'"))?
            .filter_map(|entry| entry.ok())
            .collect();
        if matches.is_empty() {
            bail!("no templates match '{pattern}'");
        }
        files.extend(matches);
    }

    let mut failed = 0;
    for file in &files {
        let source = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        match Program::compile(&source) {
            Ok(program) => println!(
                "{} {} ({} blocks)",
                "✓".green(),
                file.display(),
                program.block_count()
            ),
            Err(e) => {
                failed += 1;
                println!("{} {}", "✗".red(), file.display());
                println!("  {}", e);
                if let Some(suggestion) = e.fix_suggestion() {
                    println!("  {} {}", "Fix:".yellow(), suggestion);
                }
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} templates failed to compile", files.len());
    }
    println!("{} {} templates ok", "✓".green(), files.len());
    Ok(())
}

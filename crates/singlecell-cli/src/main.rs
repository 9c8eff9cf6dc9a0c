use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use singlecell_client::{HtmlDocument, HttpTransport, Session, SessionCommand, SessionSettings};
use singlecell_core::config::{Config, ServerConfig};

#[derive(Parser)]
#[command(
    name = "singlecell",
    about = "Run code on a single-cell compute server and render its output",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit code and wait for the session to finish
    Exec {
        /// Code to run (reads stdin when neither --code nor --file is given)
        #[arg(short = 'e', long, conflicts_with = "file")]
        code: Option<String>,

        /// Read the code from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Server base URL, overriding the config
        #[arg(long)]
        server: Option<String>,

        /// Write the rendered HTML here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a config value by dotted path
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.as_ref();
    let level = if verbose {
        "debug".to_string()
    } else {
        logging
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = tracing_subscriber::EnvFilter::new(&level);
        for directive in logging.map(|l| l.filters.as_slice()).unwrap_or_default() {
            match directive.parse::<tracing_subscriber::filter::Directive>() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring log filter '{directive}': {e}"),
            }
        }
        filter
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.is_some_and(|l| l.format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_code(code: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    match (code, file) {
        (Some(code), _) => Ok(code),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => std::io::read_to_string(std::io::stdin()).context("Failed to read stdin"),
    }
}

async fn exec(
    mut config: Config,
    code: String,
    server: Option<String>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(url) = server {
        match config.server.as_mut() {
            Some(s) => s.base_url = url,
            None => config.server = Some(ServerConfig::new(url)),
        }
    }

    let transport = HttpTransport::new(&config)?;
    let mut session = Session::new(SessionSettings::from(&config), transport, HtmlDocument::new());
    tracing::info!(session_id = %session.id(), server = config.base_url(), "Starting session");

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(SessionCommand::Submit { code })?;
    drop(tx);

    tokio::select! {
        _ = session.run(rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, writing partial output");
        }
    }

    if !session.is_done() {
        tracing::warn!(
            session_id = %session.id(),
            state = ?session.state(),
            "Session did not reach session_end"
        );
    }
    let html = session.into_surface().to_html();

    match output {
        Some(path) => {
            std::fs::write(&path, html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Output written to {}", path.display());
        }
        None => println!("{html}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Exec {
            code,
            file,
            server,
            output,
        } => {
            let code = read_code(code, file)?;
            exec(config, code, server, output).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}

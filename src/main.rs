// Command-line entry point for the kestrel add-on engine
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use std::io::stderr;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod cmd;

use cmd::demo::DemoArgs;
use cmd::render::RenderArgs;
use cmd::validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(author, version, about = "Managed logging add-on provisioning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Checks a CLS configuration file.
    Validate(ValidateArgs),
    /// Decrypts stored CLS overrides and prints the rendered fluent-bit output.
    Render(RenderArgs),
    /// Provisions and binds CLS against an in-process Service Manager.
    Demo(DemoArgs),
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_directives = format!(
        "kestrel={level},kestrel_cls={level},kestrel_workflow={level},reqwest=warn,hyper=warn",
        level = level
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    // stdout carries command output only
    registry()
        .with(filter)
        .with(fmt::layer().with_writer(stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("Global logger initialized.");

    match cli.command {
        Commands::Validate(args) => cmd::validate::run(args),
        Commands::Render(args) => cmd::render::run(args),
        Commands::Demo(args) => cmd::demo::run(args).await,
    }
}

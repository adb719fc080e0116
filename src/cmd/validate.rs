use clap::Args;
use color_eyre::eyre::Result;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the CLS configuration YAML
    #[arg(short, long)]
    pub config: PathBuf,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let config = super::load_config(&args.config)?;

    let regions: Vec<&str> = config
        .service_manager
        .credentials
        .iter()
        .map(|c| c.region.as_str())
        .collect();
    info!(path = %args.config.display(), regions = ?regions, "Configuration is valid");

    println!("Configuration OK");
    println!("  Retention period: {} days", config.retention_period);
    println!("  Data instances:   {}", config.max_data_instances);
    println!("  Ingest instances: {}", config.max_ingest_instances);
    println!("  Regions:          {}", regions.join(", "));
    Ok(())
}

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use kestrel_cls::{decrypt_overrides, get_extra_conf_template, render_overrides};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Encrypted overrides as stored on the operation
    #[arg(long)]
    pub overrides: String,

    /// Key the overrides were encrypted with
    #[arg(long, env = "KESTREL_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Template to render instead of the built-in fluent-bit output
    #[arg(long)]
    pub template: Option<PathBuf>,
}

pub fn run(args: RenderArgs) -> Result<()> {
    let params = decrypt_overrides(&args.secret_key, args.overrides.trim())
        .wrap_err("Failed to decrypt CLS overrides")?;

    let template = match &args.template {
        Some(path) => std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read template {}", path.display()))?,
        None => get_extra_conf_template().to_string(),
    };

    let rendered = render_overrides(&params, &template).wrap_err("Failed to render CLS overrides")?;
    print!("{}", rendered);
    Ok(())
}

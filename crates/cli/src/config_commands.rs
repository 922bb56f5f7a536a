use {anyhow::Result, clap::Subcommand, parley_config::ParleyConfig};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the config file path in use (or the one `init` would create).
    Path,
    /// Write a default config file if none exists.
    Init,
}

pub fn handle_config(action: ConfigAction, config: &ParleyConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        },
        ConfigAction::Path => {
            println!("{}", parley_config::find_or_default_config_path().display());
            Ok(())
        },
        ConfigAction::Init => {
            let (path, written) = parley_config::write_default_config(&ParleyConfig::default())?;
            if written {
                println!("Wrote {}", path.display());
            } else {
                println!("Config already exists at {}", path.display());
            }
            Ok(())
        },
    }
}

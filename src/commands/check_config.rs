//! Check-config command implementation

use anyhow::Result;
use supertrend_trader::Config;
use tracing::info;

pub fn run(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Configuration valid: {}", config_path);

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

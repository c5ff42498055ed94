//! `chatloom config`: configuration inspection commands.

use chatloom_config::AppConfig;

/// Print the effective configuration with the API key masked.
pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render_effective(config)?);
    Ok(())
}

pub async fn defaults() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

fn render_effective(mut config: AppConfig) -> Result<String, toml::ser::Error> {
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    toml::to_string_pretty(&config)
}

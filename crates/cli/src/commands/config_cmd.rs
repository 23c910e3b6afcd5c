//! `turnloop config` - Configuration management commands.

use turnloop_config::LoopSettings;
use turnloop_core::Error;

pub async fn validate() -> turnloop_core::Result<()> {
    println!("Validating configuration...");

    match LoopSettings::load() {
        Ok(settings) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if settings.generation.api_key.is_none() {
                warnings.push("No API key set (set TURNLOOP_API_KEY)");
            }
            if settings.completion.terminating_tools.is_empty() {
                warnings.push("No terminating tools configured; loops end only on text answers");
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Provider:        {}", settings.generation.provider);
            println!("   Model:           {}", settings.generation.model);
            println!("   Max iterations:  {}", settings.max_iterations);
            println!("   Max retries:     {}", settings.retry.max_retries);
            println!("   Tool timeout:    {}s", settings.tools.timeout_secs);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> turnloop_core::Result<()> {
    let mut shown = LoopSettings::load()?;
    if shown.generation.api_key.is_some() {
        shown.generation.api_key = Some("[REDACTED]".into());
    }
    let rendered = toml::to_string_pretty(&shown).map_err(|e| Error::Config {
        message: format!("cannot render settings: {e}"),
    })?;
    println!("{rendered}");
    Ok(())
}

pub async fn path() -> turnloop_core::Result<()> {
    let config_path = LoopSettings::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

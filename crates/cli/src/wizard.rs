//! Interactive setup wizard for osspilot configuration

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};
use osspilot_core::{get_config_path, save_config, validate_config, ConfigFile};

/// Run the interactive setup wizard
pub async fn run_init_wizard() -> Result<()> {
    println!("🚀 Welcome to osspilot setup!\n");

    println!("This wizard will guide you through the configuration process.");
    println!("You will need:");
    println!("  1. The storage service host (the default is fine for production)");
    println!("  2. Optionally, an access token with data:read and data:write scopes\n");

    let mut config = ConfigFile::default();

    // Step 1: Service host
    config.service.host = prompt_host(&config.service.host)?;

    // Step 2: Scheme
    config.service.scheme = prompt_scheme()?;

    // Step 3: Access token
    config.auth.access_token = prompt_access_token()?;

    // Step 4: Log format
    config.logging.format = prompt_log_format()?;

    validate_config(&config)?;

    // Summary
    println!("\n📋 Configuration summary:");
    println!("  Buckets URL: {}", config.buckets_url());
    println!(
        "  Access token: {}",
        if config.auth.access_token.is_some() {
            "stored in config"
        } else {
            "not stored (use OSSPILOT_ACCESS_TOKEN or --token)"
        }
    );
    println!(
        "  Chunked uploads above {} bytes ({} byte chunks)",
        config.upload.chunking_threshold, config.upload.chunk_size
    );
    println!("  Log format: {}", config.logging.format);

    // Confirmation
    let confirm = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Save this configuration?")
        .default(false)
        .interact()?;

    if !confirm {
        println!("❌ Configuration cancelled");
        return Ok(());
    }

    // Save config
    let pb = ProgressBar::new(1);
    pb.set_style(
        ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message("Saving configuration...");

    save_config(&config)?;

    pb.inc(1);
    pb.finish_with_message("✅ Configuration saved!");

    println!("\n🎉 Setup complete!");
    println!("\nConfiguration saved to: {}", get_config_path()?.display());
    println!("\nYou can now use osspilot:");
    println!("  $ osspilot upload model.rvt --bucket my-bucket --progress");
    println!("  $ osspilot details my-bucket model.rvt");
    println!("  $ osspilot limits list");

    Ok(())
}

/// Prompt for the service host
fn prompt_host(default: &str) -> Result<String> {
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Service host")
        .default(default.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Host cannot be empty")
            } else if input.contains("://") || input.contains('/') {
                Err("Enter the host only, without scheme or path")
            } else {
                Ok(())
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get host: {}", e))
}

/// Prompt for the URL scheme
fn prompt_scheme() -> Result<String> {
    let schemes = ["https", "http"];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Scheme")
        .items(&schemes)
        .default(0)
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to select scheme: {}", e))?;

    Ok(schemes[selection].to_string())
}

/// Prompt for an optional access token
fn prompt_access_token() -> Result<Option<String>> {
    let store = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Store an access token in the config file?")
        .default(false)
        .interact()?;

    if !store {
        return Ok(None);
    }

    let token = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Access token")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Access token cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get access token: {}", e))?;

    Ok(Some(token))
}

/// Prompt for the log output format
fn prompt_log_format() -> Result<String> {
    let formats = ["pretty", "json"];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Log format")
        .items(&formats)
        .default(0)
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to select log format: {}", e))?;

    Ok(formats[selection].to_string())
}

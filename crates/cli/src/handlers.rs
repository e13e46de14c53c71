//! Command handlers for osspilot CLI

use crate::wizard::run_init_wizard;
use anyhow::Result;
use bytes::Bytes;
use clap::Command;
use clap_complete::{generate, Shell as ClapShell};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use osspilot_core::{
    get_config_path, load_config, validate_config, ConfigFile, Context, EndpointLimitTable, Error,
    LimiterRegistry, Method, ObjectDetails, OssClient, SessionId, StaticToken, UploadProgress,
    UploadSession,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};

/// Load the configuration, falling back to defaults when no file exists
fn load_or_default() -> Result<ConfigFile> {
    match load_config() {
        Ok(config) => Ok(config),
        Err(Error::ConfigNotFound(_)) => Ok(ConfigFile::default()),
        Err(e) => Err(e.into()),
    }
}

/// Build a client, taking the token from the flag, the environment or the file
fn build_client(token: Option<&str>) -> Result<OssClient> {
    let config = load_or_default()?;
    validate_config(&config)?;

    let token = token
        .map(str::to_string)
        .or_else(|| config.access_token())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No access token configured.\n\
                 Use --token, set OSSPILOT_ACCESS_TOKEN or run 'osspilot config init'"
            )
        })?;

    Ok(OssClient::from_config(&config, Arc::new(StaticToken::new(token)))?)
}

/// Label cancellations so the single error report says the command was interrupted
fn report_cancellation<T>(result: osspilot_core::Result<T>) -> Result<T> {
    match result {
        Err(e) if e.is_cancellation() => Err(anyhow::Error::new(e).context("⚠️  Interrupted")),
        other => Ok(other?),
    }
}

/// Handle upload command
///
/// `resume` carries the session id and first unacknowledged byte of a chunked
/// upload that failed earlier.
pub async fn handle_upload(
    ctx: &Context,
    token: Option<&str>,
    file: &Path,
    bucket: &str,
    name: Option<&str>,
    progress: bool,
    resume: Option<(&str, u64)>,
) -> Result<()> {
    if !file.exists() {
        return Err(anyhow::anyhow!("File not found: {}", file.display()));
    }

    let object_name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive an object name from {}", file.display()))?,
    };

    let client = build_client(token)?;
    let payload = Bytes::from(tokio::fs::read(file).await?);
    let size = payload.len() as u64;
    let chunked = client.upload_config().requires_chunking(size);

    if resume.is_some() && !chunked {
        return Err(anyhow::anyhow!(
            "--session only applies to chunked uploads; {} is sent in one request",
            format_bytes(size)
        ));
    }

    println!("Uploading {} -> {}/{}...", file.display(), bucket, object_name);
    println!("  Size: {}", format_bytes(size));
    if chunked {
        println!(
            "  Mode: chunked ({} chunks of {})",
            size.div_ceil(client.upload_config().chunk_size),
            format_bytes(client.upload_config().chunk_size)
        );
    } else {
        println!("  Mode: single request");
    }

    let pb = if progress {
        let pb = ProgressBar::new(size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };
    let observer = |p: UploadProgress| {
        if let Some(pb) = &pb {
            pb.set_position(p.bytes_sent);
        }
    };
    let report = pb
        .as_ref()
        .map(|_| &observer as &(dyn Fn(UploadProgress) + Send + Sync));

    let result = if chunked {
        let mut session = match resume {
            Some((id, offset)) => UploadSession::resume(
                SessionId::from(id.to_string()),
                size,
                client.upload_config().chunk_size,
                offset,
            )?,
            None => client.start_session(&object_name, size)?,
        };
        println!("  Session: {} (from byte {})", session.id(), session.cursor());
        if let Some(pb) = &pb {
            pb.set_position(session.cursor());
        }

        let result = client
            .upload_object_resumable(ctx, bucket, &object_name, &mut session, &payload, report)
            .await;
        if result.is_err() && !session.is_finished() {
            eprintln!(
                "  Resume with: --session {} --offset {}",
                session.id(),
                session.cursor()
            );
        }
        result
    } else {
        client
            .upload_object_with_progress(ctx, bucket, &object_name, payload, report)
            .await
    };
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    let details = report_cancellation(result)?;

    println!("  ✅ Upload complete");
    print_details(&details);

    Ok(())
}

/// Handle details command
pub async fn handle_details(
    ctx: &Context,
    token: Option<&str>,
    bucket: &str,
    object: &str,
    json: bool,
) -> Result<()> {
    let client = build_client(token)?;
    let details = report_cancellation(client.object_details(ctx, bucket, object).await)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
    } else {
        print_details(&details);
    }

    Ok(())
}

/// Handle wait command
pub async fn handle_wait(ctx: &Context, token: Option<&str>, bucket: &str, object: &str) -> Result<()> {
    let client = build_client(token)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("Waiting for {}/{} to be assembled...", bucket, object));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = client.wait_for_recombination(ctx, bucket, object).await;
    spinner.finish_and_clear();

    let details = report_cancellation(result)?;
    println!("  ✅ Object ready");
    print_details(&details);

    Ok(())
}

fn print_details(details: &ObjectDetails) {
    println!("  Bucket: {}", details.bucket_key);
    println!("  Object: {}", details.object_key);
    println!("  Object ID: {}", details.object_id);
    println!("  Size: {}", format_bytes(details.size));
    if details.is_complete() {
        println!("  SHA1: {}", details.sha1);
    } else {
        println!("  SHA1: {}", style("(not assembled yet)").yellow());
    }
    if let Some(content_type) = &details.content_type {
        println!("  Content type: {}", content_type);
    }
    if !details.location.is_empty() {
        println!("  Location: {}", details.location);
    }
}

#[derive(Tabled)]
struct LimitRow {
    method: String,
    endpoint: String,
    #[tabled(rename = "per minute")]
    per_minute: u32,
    spacing: String,
}

/// Handle limits list command
pub fn handle_limits_list(method: Option<&str>) -> Result<()> {
    let table = load_or_default()?.endpoint_limits();
    let filter = method.map(parse_method).transpose()?;

    let mut rows: Vec<LimitRow> = table
        .rules()
        .iter()
        .filter(|rule| filter.as_ref().map_or(true, |m| *m == rule.method))
        .map(|rule| LimitRow {
            method: rule.method.to_string(),
            endpoint: rule.template.clone(),
            per_minute: rule.per_minute,
            spacing: format_spacing(rule.per_minute),
        })
        .collect();

    if filter.is_none() {
        rows.push(LimitRow {
            method: "*".to_string(),
            endpoint: format!("{}/oss/v2/**", table.host()),
            per_minute: table.storage_per_minute(),
            spacing: format_spacing(table.storage_per_minute()),
        });
        rows.push(LimitRow {
            method: "*".to_string(),
            endpoint: "(anything else)".to_string(),
            per_minute: table.fallback_per_minute(),
            spacing: format_spacing(table.fallback_per_minute()),
        });
    }

    if rows.is_empty() {
        println!("  No rules found");
    } else {
        println!("Rate limits for {}", table.host());
        println!();
        println!("{}", Table::new(rows));
    }

    Ok(())
}

/// Handle limits resolve command
pub fn handle_limits_resolve(method: &str, url: &str) -> Result<()> {
    let table: EndpointLimitTable = load_or_default()?.endpoint_limits();
    let registry = LimiterRegistry::new(&table)?;
    let method = parse_method(method)?;

    let limiter = registry.lookup(&method, url);
    let ceiling = limiter.bucket().ceiling();

    println!("{} {}", method, url);
    println!("  Limiter: {}", limiter.label());
    println!("  Ceiling: {} requests/minute", ceiling);
    println!("  Spacing: {}", format_spacing(ceiling));

    Ok(())
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("Invalid HTTP method: {}", method))
}

/// Minimum time between two requests at `per_minute`
fn format_spacing(per_minute: u32) -> String {
    if per_minute == 0 {
        return "-".to_string();
    }
    let millis = 60_000.0 / per_minute as f64;
    if millis >= 1000.0 {
        format!("{:.1}s", millis / 1000.0)
    } else {
        format!("{:.0}ms", millis)
    }
}

/// Handle config commands
pub async fn handle_config(action: &str) -> Result<()> {
    match action {
        "init" => run_init_wizard().await,
        "show" => {
            println!("Current configuration:");
            println!();

            let config = load_config()?;

            println!("Service:");
            println!("  Host: {}", config.service.host);
            println!("  Buckets URL: {}", config.buckets_url());
            println!("  Request timeout: {}s", config.service.request_timeout);
            println!();
            println!("Auth:");
            println!(
                "  Access token: {}",
                match &config.auth.access_token {
                    Some(token) => mask_token(token),
                    None => "(not set)".to_string(),
                }
            );
            println!();
            println!("Limits:");
            println!("  Storage: {}/min", config.limits.storage_per_minute);
            println!("  Fallback: {}/min", config.limits.fallback_per_minute);
            println!();
            println!("Upload:");
            println!("  Chunking threshold: {}", format_bytes(config.upload.chunking_threshold));
            println!("  Chunk size: {}", format_bytes(config.upload.chunk_size));
            println!();
            println!("Recombination:");
            println!("  Poll interval: {}s", config.recombination.poll_interval);
            println!("  Timeout: {}s", config.recombination.timeout);
            println!();
            println!("Logging:");
            println!("  Level: {}", config.logging.level);
            println!("  Format: {}", config.logging.format);

            Ok(())
        }
        "validate" => {
            println!("Validating configuration...");

            let config = load_config()?;
            validate_config(&config)?;
            println!("  ✅ Valid configuration format");

            if config.access_token().is_some() {
                println!("  ✅ Access token available");
            } else {
                println!("  ⚠️  No access token (set OSSPILOT_ACCESS_TOKEN or use --token)");
            }

            Ok(())
        }
        "path" => {
            println!("{}", get_config_path()?.display());
            Ok(())
        }
        _ => {
            println!("Unknown action: {}", action);
            println!("Available actions: init, show, validate, path");
            Ok(())
        }
    }
}

fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    format!("{}…", visible)
}

/// Format bytes to human-readable size
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Handle shell completion generation
pub async fn handle_completion(shell: &str, cmd: &mut Command) -> Result<()> {
    use std::io;

    let clap_shell = match shell {
        "bash" => ClapShell::Bash,
        "zsh" => ClapShell::Zsh,
        "fish" => ClapShell::Fish,
        "elvish" => ClapShell::Elvish,
        "powershell" | "pwsh" => ClapShell::PowerShell,
        _ => {
            return Err(anyhow::anyhow!(
                "Unsupported shell: {}\nSupported shells: bash, zsh, fish, elvish, powershell",
                shell
            ));
        }
    };

    generate(clap_shell, cmd, "osspilot", &mut io::stdout());

    eprintln!();
    eprintln!("Installation instructions:");

    match shell {
        "bash" => {
            eprintln!("  # Add to your ~/.bashrc:");
            eprintln!("  source <(osspilot completion bash)");
        }
        "zsh" => {
            eprintln!("  # Add to your ~/.zshrc:");
            eprintln!("  source <(osspilot completion zsh)");
        }
        "fish" => {
            eprintln!("  osspilot completion fish > ~/.config/fish/completions/osspilot.fish");
        }
        "elvish" => {
            eprintln!("  osspilot completion elvish > ~/.elvish/lib/osspilot.elv");
        }
        "powershell" | "pwsh" => {
            eprintln!("  osspilot completion powershell | Out-String | Invoke-Expression");
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(5_000_000), "4.77 MB");
    }

    #[test]
    fn test_format_spacing() {
        assert_eq!(format_spacing(1000), "60ms");
        assert_eq!(format_spacing(50), "1.2s");
        assert_eq!(format_spacing(0), "-");
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("PATCH").unwrap(), Method::PATCH);
        assert!(parse_method("NOT A METHOD").is_err());
    }

    #[test]
    fn test_cancellation_is_reported_once() {
        let err = report_cancellation::<()>(Err(Error::DeadlineExceeded)).unwrap_err();
        assert_eq!(err.to_string(), "⚠️  Interrupted");
        assert!(matches!(
            err.root_cause().downcast_ref::<Error>(),
            Some(Error::DeadlineExceeded)
        ));

        let err = report_cancellation::<()>(Err(Error::InvalidInput("x".to_string()))).unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: x");

        assert_eq!(report_cancellation(Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("eyJhbGciOiJSUzI1NiIs"), "eyJhbG…");
    }
}

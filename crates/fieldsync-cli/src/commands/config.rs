use fieldsync_core::SyncConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::load_sync_config;
use crate::config::{is_http_url, normalize_text_option, CliConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            remote_url,
            auth_token,
            collections,
            sync_interval_secs,
        } => run_config_init(remote_url, auth_token, collections, sync_interval_secs),
        ConfigCommands::Show => run_config_show(),
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_init(
    remote_url: Option<String>,
    auth_token: Option<String>,
    collections: Vec<String>,
    sync_interval_secs: Option<u64>,
) -> Result<(), CliError> {
    let mut config = CliConfig::load().map_err(CliError::Config)?;
    apply_config_updates(
        &mut config,
        remote_url,
        auth_token,
        collections,
        sync_interval_secs,
    )?;

    // Reject values the engine would refuse later
    config.sync_config(|_| None)?;

    let path = config.save().map_err(CliError::Config)?;
    println!("Saved config to {}", path.display());
    Ok(())
}

pub fn apply_config_updates(
    config: &mut CliConfig,
    remote_url: Option<String>,
    auth_token: Option<String>,
    collections: Vec<String>,
    sync_interval_secs: Option<u64>,
) -> Result<(), CliError> {
    if let Some(url) = normalize_text_option(remote_url) {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "--remote-url must start with http:// or https://".to_string(),
            ));
        }
        config.remote_url = Some(url);
    }
    if let Some(token) = normalize_text_option(auth_token) {
        config.auth_token = Some(token);
    }
    if !collections.is_empty() {
        config.collections = collections;
    }
    if sync_interval_secs.is_some() {
        config.sync_interval_secs = sync_interval_secs;
    }
    Ok(())
}

pub fn run_config_show() -> Result<(), CliError> {
    let config = load_sync_config()?;
    for line in describe_config(&config) {
        println!("{line}");
    }
    Ok(())
}

pub fn describe_config(config: &SyncConfig) -> Vec<String> {
    vec![
        format!(
            "remote_url       {}",
            config.remote_url.as_deref().unwrap_or("(not configured)")
        ),
        format!(
            "auth_token       {}",
            if config.auth_token.is_some() { "[REDACTED]" } else { "(none)" }
        ),
        format!(
            "sync_interval    {}",
            config
                .sync_interval
                .map_or_else(|| "manual".to_string(), |every| format!("{}s", every.as_secs()))
        ),
        format!("request_timeout  {}s", config.request_timeout.as_secs()),
        format!("max_in_flight    {}", config.max_in_flight),
        format!("collections      {}", config.collections.join(", ")),
    ]
}

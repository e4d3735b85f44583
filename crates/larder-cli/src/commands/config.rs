use std::env;

use serde::Serialize;

use crate::cli::ConfigCommands;
use crate::config_profiles::{
    default_config_path, is_http_url, normalize_text_option, CliProfile, CliProfilesConfig,
};
use crate::error::CliError;

pub struct ProfileUpdate {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub incremental_pull: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub name: String,
    pub active: bool,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub request_timeout_secs: u64,
    pub incremental_pull: bool,
}

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            supabase_url,
            supabase_anon_key,
            request_timeout_secs,
            incremental_pull,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            ProfileUpdate {
                supabase_url,
                supabase_anon_key,
                request_timeout_secs,
                incremental_pull,
            },
            no_activate,
        ),
        ConfigCommands::Show { json } => run_config_show(global_profile, json),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    apply_profile_update(
        profile,
        update,
        normalize_text_option(env::var("SUPABASE_URL").ok()),
        normalize_text_option(env::var("SUPABASE_ANON_KEY").ok()),
    );
    validate_profile(profile)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let missing_fields = missing_fields(profile);
    if missing_fields.is_empty() {
        println!(
            "Profile '{profile_name}' is ready. Run `larder auth login --email <email> --password <password>`."
        );
    } else {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing_fields.join(", ")
        );
    }

    Ok(())
}

pub fn run_config_show(profile_name: Option<&str>, as_json: bool) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    let view = profile_view(
        &profile_name,
        profile,
        config.active_profile.as_deref() == Some(profile_name.as_str()),
    );
    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let path = default_config_path().map_err(CliError::Config)?;
    println!("Config file:        {}", path.display());
    println!(
        "Profile:            {}{}",
        view.name,
        if view.active { " (active)" } else { "" }
    );
    println!(
        "Supabase URL:       {}",
        view.supabase_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Supabase anon key:  {}",
        view.supabase_anon_key.as_deref().unwrap_or("(not set)")
    );
    println!("Request timeout:    {}s", view.request_timeout_secs);
    println!(
        "Pull mode:          {}",
        if view.incremental_pull {
            "incremental"
        } else {
            "full"
        }
    );
    Ok(())
}

/// Explicit flags win over the environment, which wins over stored values.
pub fn apply_profile_update(
    profile: &mut CliProfile,
    update: ProfileUpdate,
    env_supabase_url: Option<String>,
    env_supabase_anon_key: Option<String>,
) {
    if let Some(value) = normalize_text_option(update.supabase_url).or(env_supabase_url) {
        profile.supabase_url = Some(value);
    }
    if let Some(value) = normalize_text_option(update.supabase_anon_key).or(env_supabase_anon_key)
    {
        profile.supabase_anon_key = Some(value);
    }
    if let Some(secs) = update.request_timeout_secs {
        profile.request_timeout_secs = Some(secs);
    }
    if let Some(incremental) = update.incremental_pull {
        profile.incremental_pull = Some(incremental);
    }
}

pub fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = profile.supabase_url() {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "supabase_url must include http:// or https://".to_string(),
            ));
        }
    }
    if profile.request_timeout_secs == Some(0) {
        return Err(CliError::Config(
            "request_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

pub fn missing_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if profile.supabase_url().is_none() {
        missing.push("supabase_url");
    }
    if profile.supabase_anon_key().is_none() {
        missing.push("supabase_anon_key");
    }
    missing
}

pub fn profile_view(name: &str, profile: &CliProfile, active: bool) -> ProfileView {
    let sync_config = profile.sync_config();
    ProfileView {
        name: name.to_string(),
        active,
        supabase_url: profile.supabase_url(),
        supabase_anon_key: profile.supabase_anon_key().map(|key| mask_secret(&key)),
        request_timeout_secs: sync_config.request_timeout().as_secs(),
        incremental_pull: sync_config.pull_mode == larder_core::config::PullMode::Incremental,
    }
}

/// Keep a short prefix so keys can be told apart without being printed.
pub fn mask_secret(value: &str) -> String {
    let prefix = value.chars().take(6).collect::<String>();
    if prefix.chars().count() == value.chars().count() {
        "***".to_string()
    } else {
        format!("{prefix}***")
    }
}

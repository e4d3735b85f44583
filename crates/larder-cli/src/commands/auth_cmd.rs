use std::path::Path;

use larder_core::sync::{LocalStoreAdapter, TableRegistry};

use crate::auth::{auth_client_for_profile, clear_stored_session, load_stored_session};
use crate::cli::AuthCommands;
use crate::commands::common::{account_session, open_store, SignedInProfile};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub async fn run_auth(
    command: AuthCommands,
    global_profile: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    match command {
        AuthCommands::Login {
            profile,
            email,
            password,
        } => run_login(profile.as_deref().or(global_profile), &email, &password).await,
        AuthCommands::Status { profile } => run_status(profile.as_deref().or(global_profile)).await,
        AuthCommands::Logout { profile } => {
            run_logout(profile.as_deref().or(global_profile), db_path).await
        }
    }
}

async fn run_login(profile: Option<&str>, email: &str, password: &str) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile);
    let profile_config = config.profile(&profile_name).ok_or_else(|| {
        CliError::Config(format!(
            "Profile '{profile_name}' is not configured. Run `larder config init --profile {profile_name}` first."
        ))
    })?;
    let auth = auth_client_for_profile(&profile_name, profile_config)?.ok_or_else(|| {
        CliError::Config(format!(
            "Profile '{profile_name}' missing Supabase auth config. Set SUPABASE_URL and SUPABASE_ANON_KEY via `larder config init`."
        ))
    })?;

    let session = auth.sign_in(email, password).await?;
    let email_label = session.user.email.as_deref().unwrap_or("(no email)");
    println!("Signed in profile '{profile_name}' as {email_label}");
    Ok(())
}

async fn run_status(profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    let session = match auth_client_for_profile(&profile_name, profile)? {
        Some(auth) => auth.restore_session().await?,
        None => load_stored_session(&profile_name)?,
    };

    if let Some(session) = session {
        let email_label = session.user.email.as_deref().unwrap_or("(no email)");
        println!(
            "Profile '{}' is signed in as {} (user_id={}, expires_at={})",
            profile_name, email_label, session.user.id, session.expires_at
        );
    } else {
        println!("Profile '{profile_name}' is not signed in.");
    }
    Ok(())
}

/// Local data goes first; the remote session is only ended once the wipe
/// succeeded.
async fn run_logout(profile: Option<&str>, db_path: &Path) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile);
    let registry = TableRegistry::larder_default();
    let store = open_store(db_path, &registry).await?;

    let auth = match config.profile(&profile_name) {
        Some(profile_config) => auth_client_for_profile(&profile_name, profile_config)?
            .map(|auth| (auth, profile_config)),
        None => None,
    };
    let stored_session = load_stored_session(&profile_name)?;

    match (auth, stored_session) {
        (Some((auth, profile_config)), Some(session)) => {
            let backend = profile_config
                .backend_config()
                .map_err(CliError::Config)?
                .ok_or_else(|| CliError::Config("Supabase is not configured".to_string()))?;
            let signed_in = SignedInProfile {
                name: profile_name.clone(),
                backend,
                sync_config: profile_config.sync_config(),
                auth,
                session,
            };
            let account = account_session(store, registry, &signed_in)?;
            account
                .sign_out(&signed_in.auth, &signed_in.session.access_token)
                .await?;
        }
        _ => {
            store.clear_all(&registry).await?;
            clear_stored_session(&profile_name)?;
        }
    }

    println!("Cleared local data and signed out profile '{profile_name}'");
    Ok(())
}

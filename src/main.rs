use std::collections::BTreeSet;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use passport_pals::auth::{AuthError, AuthFacade, AuthViewState};
use passport_pals::backend::memory::InMemoryBackend;
use passport_pals::backend::rest::RestBackend;
use passport_pals::backend::BackendError;
use passport_pals::config::{AppConfig, ConfigError};
use passport_pals::profile::{ProfilePatch, Role};
use serde_json::{Value, json};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("{}", .0.user_message())]
    Auth(#[from] AuthError),
    #[error("no redirect URL; pass --redirect-url or set PALS_AUTH_REDIRECT_URL")]
    MissingRedirectUrl,
    #[error("nothing to update; pass at least one field")]
    EmptyPatch,
    #[error("auth state closed before sign-in completed")]
    StateClosed,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "passport-pals", about = "Passport Pals account and profile CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Email a passwordless sign-in link.
    Login { email: String },
    /// Complete a sign-in with the one-time code from the email.
    Verify {
        email: String,
        #[arg(long)]
        code: String,
    },
    /// Print the current auth view.
    Whoami,
    Logout,
    UpdateProfile(UpdateProfileArgs),
    ResetPassword {
        email: String,
        #[arg(long, env = "PALS_AUTH_REDIRECT_URL")]
        redirect_url: Option<String>,
    },
    SetPassword {
        #[arg(long, env = "PALS_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Walk through sign-in, update, and sign-out against an in-process backend.
    Demo {
        #[arg(long, default_value = "ana@example.com")]
        email: String,
    },
}

#[derive(Args, Debug)]
struct UpdateProfileArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    role: Option<String>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    occupation: Option<String>,
    #[arg(long)]
    bio: Option<String>,
    /// Replaces the interest set; repeat for several.
    #[arg(long = "interest")]
    interests: Vec<String>,
    #[arg(long)]
    profile_image: Option<String>,
}

impl UpdateProfileArgs {
    fn into_patch(self) -> ProfilePatch {
        ProfilePatch {
            name: self.name,
            role: self.role.map(Role::from).inspect(|role| {
                if !role.is_known() {
                    warn!(role = role.as_str(), "role is not one of the picker roles; storing it as given");
                }
            }),
            country: self.country,
            city: self.city,
            occupation: self.occupation,
            bio: self.bio,
            interests: (!self.interests.is_empty()).then(|| self.interests.into_iter().collect::<BTreeSet<_>>()),
            profile_image: self.profile_image,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let env_file = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = env_file {
        debug!(error = %e, "no .env file loaded");
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Demo { email } => run_demo(&email).await,
        command => run_remote(command).await,
    }
}

async fn run_remote(command: Command) -> Result<(), CliError> {
    let config = AppConfig::from_env()?;
    let default_redirect = config.backend.redirect_url.clone();
    let backend = Arc::new(RestBackend::connect(config.backend).await?);

    // A verified session must be in place before the facade restores it.
    if let Command::Verify { email, code } = &command {
        backend.verify_email_otp(email, code).await?;
    }
    let facade = AuthFacade::start_with(backend, config.auth);

    match command {
        Command::Login { email } => {
            facade.login(&email).await?;
            print_json(&json!({ "status": "link_sent", "email": email }))
        }
        Command::Verify { .. } | Command::Whoami => print_view(&facade.wait_until_loaded().await),
        Command::Logout => {
            facade.wait_until_loaded().await;
            facade.logout().await?;
            print_view(&facade.view())
        }
        Command::UpdateProfile(args) => {
            let patch = args.into_patch();
            if patch.is_empty() {
                return Err(CliError::EmptyPatch);
            }
            facade.wait_until_loaded().await;
            let profile = facade.update_profile(patch).await?;
            print_json(&serde_json::to_value(profile)?)
        }
        Command::ResetPassword { email, redirect_url } => {
            let redirect_url = redirect_url.or(default_redirect).ok_or(CliError::MissingRedirectUrl)?;
            facade.request_password_reset(&email, &redirect_url).await?;
            print_json(&json!({ "status": "reset_sent", "email": email }))
        }
        Command::SetPassword { password } => {
            facade.wait_until_loaded().await;
            facade.set_new_password(&password).await?;
            print_json(&json!({ "status": "password_updated" }))
        }
        Command::Demo { email } => run_demo(&email).await,
    }
}

async fn run_demo(email: &str) -> Result<(), CliError> {
    let backend = Arc::new(InMemoryBackend::with_demo_profiles());
    let facade = AuthFacade::start(backend.clone());
    print_step("initial", &facade.wait_until_loaded().await)?;

    facade.login(email).await?;
    backend.complete_email_link(email)?;
    let mut rx = facade.watch();
    let signed_in = rx
        .wait_for(|view| !view.is_loading() && view.is_authenticated())
        .await
        .map_err(|_| CliError::StateClosed)?
        .clone();
    print_step("signed_in", &signed_in)?;

    let patch = ProfilePatch {
        bio: Some("Looking for a language exchange partner.".to_owned()),
        ..ProfilePatch::default()
    };
    facade.update_profile(patch).await?;
    print_step("profile_updated", &facade.view())?;

    facade.logout().await?;
    print_step("signed_out", &facade.view())
}

fn print_view(view: &AuthViewState) -> Result<(), CliError> {
    print_json(&serde_json::to_value(view)?)
}

fn print_step(step: &str, view: &AuthViewState) -> Result<(), CliError> {
    print_json(&json!({ "step": step, "view": serde_json::to_value(view)? }))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

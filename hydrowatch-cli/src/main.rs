//! HydroWatch CLI - Command-line client for the dashboard session
//!
//! Signs in against the dashboard backend, keeps the session on disk between
//! invocations, and exposes the admin portal-user management endpoints.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use hydrowatch_api::{HttpAuthApi, PortalUserCreate, PortalUserUpdate, ProfileUpdate};
use hydrowatch_core::{init_logging, HydroConfig, LoggingConfig};
use hydrowatch_session::{GuardDecision, Identity, Role, RouteGuard, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "hydrowatch")]
#[command(about = "Session client for the HydroWatch water-quality dashboard")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as an administrator
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Sign in as a portal user
    PortalLogin {
        /// Unique ID issued by an administrator, e.g. WU-2024-001
        unique_id: String,
    },

    /// Create an administrator account and sign in
    Register {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// Full name shown in the dashboard
        #[arg(long)]
        name: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show who is signed in
    #[command(alias = "whoami")]
    Status,

    /// Renew the stored tokens
    Refresh,

    /// Update the administrator profile
    Profile {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        avatar_url: Option<String>,
    },

    /// Manage portal users (administrators only)
    Users {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Evaluate the route guard for a location
    Guard {
        /// Location such as /analytics or /user
        location: String,

        /// Print where a sign-in would land instead
        #[arg(long)]
        after_login: bool,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// List portal users
    List,

    /// Show one portal user
    Get { id: String },

    /// Register a portal user
    Create {
        #[arg(long)]
        unique_id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        /// Service area
        #[arg(long)]
        area: Option<String>,
    },

    /// Update a portal user
    Update {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        area: Option<String>,

        #[arg(long)]
        active: Option<bool>,
    },

    /// Delete a portal user
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if cli.verbose {
        config.logging = LoggingConfig::verbose();
    }

    init_logging(&config.logging).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting HydroWatch CLI v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::Config {
        show,
        init,
        validate,
    } = &cli.command
    {
        return handle_config(&config, *show, *init, *validate);
    }

    let (session, api) = SessionManager::with_http(&config)?;

    match cli.command {
        Commands::Login { email, password } => {
            let identity = session.login(&email, &password).await?;
            print_signed_in(&identity);
        }
        Commands::PortalLogin { unique_id } => {
            let identity = session.portal_login(&unique_id).await?;
            print_signed_in(&identity);
        }
        Commands::Register {
            email,
            password,
            name,
        } => {
            let identity = session
                .register(&email, &password, name.as_deref())
                .await?;
            print_signed_in(&identity);
        }
        Commands::Logout => {
            session.logout().await?;
            println!("Signed out");
        }
        Commands::Status => {
            session.initialize().await;
            println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
        }
        Commands::Refresh => {
            if !session.refresh().await {
                bail!("Session expired. Please sign in again.");
            }
            println!("Tokens renewed");
        }
        Commands::Profile { name, avatar_url } => {
            let identity = session
                .update_profile(ProfileUpdate {
                    full_name: name,
                    avatar_url,
                })
                .await?;
            println!("Profile updated for {}", identity.display_name());
        }
        Commands::Users { action } => handle_users(&session, api, action).await?,
        Commands::Guard {
            location,
            after_login,
        } => {
            session.initialize().await;
            let guard = RouteGuard::dashboard();
            let snapshot = session.snapshot();

            if after_login {
                let role = snapshot
                    .role()
                    .context("Sign in first to compute a landing location")?;
                println!("{}", guard.post_login_destination(Some(&location), role));
            } else {
                let decision = guard.evaluate(&snapshot, &location);
                println!("{}", serde_json::to_string_pretty(&decision)?);
                if let GuardDecision::Redirect(redirect) = decision {
                    info!(to = %redirect.to, "Guard redirected");
                }
            }
        }
        // Handled before the session is opened
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn load_config(config_path: Option<&PathBuf>) -> anyhow::Result<HydroConfig> {
    if let Some(path) = config_path {
        return HydroConfig::load(Some(path.as_path()))
            .with_context(|| format!("Failed to load configuration from {:?}", path));
    }

    let default_paths = [
        dirs::config_dir().map(|d| d.join("hydrowatch").join("config.toml")),
        Some(PathBuf::from("hydrowatch.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            return HydroConfig::load(Some(path.as_path()))
                .with_context(|| format!("Failed to load configuration from {:?}", path));
        }
    }

    Ok(HydroConfig::load(None)?)
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .map(|d| d.join("hydrowatch").join("config.toml"))
        .context("Could not determine a configuration directory")
}

fn handle_config(config: &HydroConfig, show: bool, init: bool, validate: bool) -> anyhow::Result<()> {
    if init {
        let path = default_config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        HydroConfig::default().save_to_file(&path)?;
        println!("Configuration initialized at: {:?}", path);
    }

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    if validate {
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}

fn print_signed_in(identity: &Identity) {
    let home = identity.role().home_path();
    println!("Signed in as {} ({})", identity.display_name(), identity.role());
    println!("Landing page: {}", home);
}

async fn handle_users(
    session: &SessionManager,
    api: Arc<HttpAuthApi>,
    action: UserAction,
) -> anyhow::Result<()> {
    session.initialize().await;
    if session.snapshot().role() != Some(Role::Admin) {
        bail!("Portal user management requires an administrator session");
    }

    match action {
        UserAction::List => {
            let users = session
                .authorized(|token| {
                    let api = api.clone();
                    async move { api.list_portal_users(&token).await }
                })
                .await?;

            if users.is_empty() {
                println!("No portal users");
            }
            for user in users {
                let status = if user.is_active.unwrap_or(true) {
                    "active"
                } else {
                    "inactive"
                };
                println!(
                    "{:<14} {:<24} {:<10} {}",
                    user.unique_id,
                    user.full_name,
                    status,
                    user.area.as_deref().unwrap_or("-")
                );
            }
        }
        UserAction::Get { id } => {
            let user = session
                .authorized(|token| {
                    let api = api.clone();
                    let id = id.clone();
                    async move { api.get_portal_user(&token, &id).await }
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        UserAction::Create {
            unique_id,
            name,
            email,
            phone,
            area,
        } => {
            let request = PortalUserCreate {
                unique_id,
                full_name: name,
                email,
                phone,
                area,
            };
            let user = session
                .authorized(|token| {
                    let api = api.clone();
                    let request = request.clone();
                    async move { api.create_portal_user(&token, &request).await }
                })
                .await?;
            println!("Created portal user {}", user.unique_id);
        }
        UserAction::Update {
            id,
            name,
            email,
            phone,
            area,
            active,
        } => {
            let update = PortalUserUpdate {
                full_name: name,
                email,
                phone,
                area,
                is_active: active,
            };
            let user = session
                .authorized(|token| {
                    let api = api.clone();
                    let id = id.clone();
                    let update = update.clone();
                    async move { api.update_portal_user(&token, &id, &update).await }
                })
                .await?;
            println!("Updated portal user {}", user.unique_id);
        }
        UserAction::Delete { id } => {
            session
                .authorized(|token| {
                    let api = api.clone();
                    let id = id.clone();
                    async move { api.delete_portal_user(&token, &id).await }
                })
                .await?;
            println!("Deleted portal user {}", id);
        }
    }

    Ok(())
}

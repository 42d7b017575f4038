use anyhow::Result;
use clap::{Parser, Subcommand};
use resource_server_auth::auth::{IssuerDirectory, KeyProviderCache, read_unverified_issuer};
use resource_server_auth::{AuthService, AuthSettings, Issuer, JwksUrl, RawToken};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resource-server-auth")]
#[command(about = "Multi-issuer bearer-token authentication for resource servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the demo resource server (public API plus admin API)
    Serve {
        #[arg(long, env = "AUTH_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Bind address for the admin API (internal / trusted only)
        #[arg(long, env = "AUTH_ADMIN_BIND", default_value = "127.0.0.1:8081")]
        admin_bind: String,
        /// Path to auth.json (defaults to AUTH_CONFIG, XDG config dir, ./auth.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the unverified issuer of a token
    Inspect { token: String },
    /// Fetch an issuer's JWKS through the key cache and list its keys
    Resolve {
        issuer: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_settings(config: Option<PathBuf>) -> Result<AuthSettings> {
    match config {
        Some(path) => {
            info!("Loading auth config from {}", path.display());
            AuthSettings::load(&path)
        }
        None => AuthSettings::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("resource_server_auth=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            admin_bind,
            config,
        } => {
            let settings = load_settings(config)?;
            info!("Starting resource server in {:?} mode", settings.mode);

            let service = Arc::new(AuthService::from_settings(&settings).await);
            let _refresh_tasks = service.spawn_refresh_tasks(&settings);

            let public_app = resource_server_auth::api::create_public_router(service.clone());
            let admin_app = resource_server_auth::api::create_admin_router(service.clone());

            let public_listener = tokio::net::TcpListener::bind(&bind).await?;
            let admin_listener = tokio::net::TcpListener::bind(&admin_bind).await?;

            info!("Public server listening on http://{}", bind);
            info!("Admin server listening on http://{}", admin_bind);

            tokio::try_join!(
                axum::serve(public_listener, public_app),
                axum::serve(admin_listener, admin_app),
            )?;
        }
        Commands::Inspect { token } => {
            let token = RawToken::new(token.trim());
            match read_unverified_issuer(&token) {
                Ok(issuer) => println!("Issuer (unverified): {}", issuer),
                Err(e) => {
                    println!("Could not read issuer: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Resolve { issuer, config } => {
            let settings = load_settings(config)?;

            // Fixed issuers resolve too, so one command covers both modes.
            let mut directory: IssuerDirectory = settings.issuer_directory();
            for fixed in &settings.fixed_issuers {
                directory = directory.with_issuer(
                    Issuer::new(fixed.issuer.as_str()),
                    JwksUrl::new(fixed.jwks_url.as_str()),
                    settings.verifier_options(fixed.audience.clone(), fixed.claims),
                );
            }

            let cache = KeyProviderCache::new(Arc::new(directory), settings.fetcher());
            let issuer = Issuer::new(issuer);
            let verifier = cache.resolve(&issuer).await?;

            println!("Issuer:   {}", verifier.issuer());
            println!("Provider: {}", verifier.provider());
            println!("Keys:     {}", verifier.key_count());
            for kid in verifier.key_ids() {
                println!("  kid: {}", kid);
            }
        }
    }

    Ok(())
}

//! OAuth 2.1 / OpenID Connect Authorization Server - Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use authorization_server::{
    clients::{ClientAuthMethod, GrantType, RegisteredClient, file},
    config::Config,
    keys::{self, KeyManager, SigningKey},
    server::{AuthorizationServer, transport::HttpState},
    subject::StaticResourceOwners,
};

#[derive(Parser, Debug)]
#[command(name = "authorization-server")]
#[command(about = "OAuth 2.1 / OpenID Connect authorization server")]
#[command(version)]
struct Cli {
    /// Issuer identifier and public base URL (e.g., https://auth.example.com)
    #[arg(long, env = "ISSUER")]
    issuer: Option<String>,

    /// HTTP server port
    #[arg(long, default_value = "8033", env = "PORT")]
    port: u16,

    /// JSON file with client registrations
    #[arg(long, env = "CLIENTS_FILE")]
    clients_file: Option<PathBuf>,

    /// PKCS#8 PEM file with the RSA signing key (generated when omitted)
    #[arg(long, env = "SIGNING_KEY_PEM")]
    signing_key_pem: Option<PathBuf>,

    /// RSA modulus size for generated signing keys
    #[arg(long, default_value = "2048", env = "KEY_BITS")]
    key_bits: usize,

    /// Also serve the deprecated password and implicit grants
    #[arg(long, env = "ENABLE_LEGACY_GRANTS")]
    enable_legacy_grants: bool,

    /// Open RFC 7591 dynamic client registration
    #[arg(long, env = "ALLOW_REGISTRATION")]
    allow_registration: bool,

    /// Register the `messaging-client` demo client (and demo user for the password grant)
    #[arg(long)]
    demo_client: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

/// The confidential client of the classic Spring sample, for local trials.
fn demo_client() -> anyhow::Result<RegisteredClient> {
    RegisteredClient::builder("messaging-client")
        .client_name("Messaging Client")
        .client_secret("secret")
        .authentication_method(ClientAuthMethod::ClientSecretBasic)
        .authentication_method(ClientAuthMethod::ClientSecretPost)
        .grant_type(GrantType::AuthorizationCode)
        .grant_type(GrantType::RefreshToken)
        .grant_type(GrantType::ClientCredentials)
        .redirect_uri("http://127.0.0.1:8080/login/oauth2/code/messaging-client-oidc")
        .redirect_uri("http://127.0.0.1:8080/authorized")
        .scope("openid")
        .scope("message.read")
        .scope("message.write")
        .require_consent(true)
        .build()
        .context("Failed to build demo client")
}

fn load_keys(cli: &Cli) -> anyhow::Result<KeyManager> {
    let Some(path) = &cli.signing_key_pem else {
        return Ok(KeyManager::generate(cli.key_bits)?);
    };
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read signing key {}", path.display()))?;
    let key = SigningKey::from_pkcs8_pem(keys::new_kid(), &pem)
        .with_context(|| format!("Failed to load signing key {}", path.display()))?;
    tracing::info!(kid = %key.kid(), path = %path.display(), "Loaded signing key");
    Ok(KeyManager::from_key(key, cli.key_bits))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting authorization server");

    let mut config = Config::from_env()?;
    if let Some(issuer) = &cli.issuer {
        config.issuer = issuer.trim_end_matches('/').to_owned();
    }
    config.key_bits = cli.key_bits;
    config.allow_dynamic_registration = cli.allow_registration;
    if cli.enable_legacy_grants {
        tracing::warn!("Password and implicit grants are enabled");
        config = config.with_legacy_grants();
    }

    let mut clients = match &cli.clients_file {
        Some(path) => file::load_clients(path)?,
        None => Vec::new(),
    };
    if cli.demo_client {
        clients.push(demo_client()?);
    }
    if clients.is_empty() && !config.allow_dynamic_registration {
        tracing::warn!("No clients registered; pass --clients-file or --demo-client");
    }

    let keys = load_keys(&cli)?;
    let mut state = HttpState::in_memory(config, keys, clients);
    if cli.demo_client && cli.enable_legacy_grants {
        let owners = StaticResourceOwners::new().with_user("user", "password")?;
        state = state.with_resource_owners(Arc::new(owners));
    }

    tracing::info!(port = cli.port, issuer = %state.config.issuer, "Running in HTTP mode");
    AuthorizationServer::new(state).run_http(cli.port).await
}

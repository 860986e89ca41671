// # ddnsd - DDNS Daemon
//
// Thin integration layer: everything that decides what to change lives in
// ddns-core. The daemon is responsible for:
// 1. Reading the JSON config file named by the environment
// 2. Initializing logging and the runtime
// 3. Registering providers and IP sources, building the collaborators
// 4. Running the supervisor until SIGTERM/SIGINT
//
// ## Environment
//
// - `DDNS_CONFIG`: path to the JSON config (default `/etc/ddns/config.json`)
// - `DDNS_LOG_LEVEL`: trace, debug, info, warn, error (default `info`)
// - `DDNS_PROVIDER_API_TOKEN`: overrides the Cloudflare `api_token` so the
//   secret need not live in the file
//
// ## Example config
//
// ```json
// {
//   "provider": { "type": "cloudflare", "api_token": "..." },
//   "domains": [
//     { "domain_name": "example.com", "sub_domains": ["@", "www", "-old"] }
//   ],
//   "ip_type": "IPv4",
//   "interval_secs": 300
// }
// ```

use anyhow::{Context, Result};
use ddns_core::traits::{Notifier, Resolver};
use ddns_core::{Collaborators, DdnsConfig, LogNotifier, ProviderConfig, Supervisor, SupervisorEvent};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_CONFIG_PATH: &str = "/etc/ddns/config.json";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Settings read from the environment
struct Env {
    config_path: String,
    log_level: String,
    api_token: Option<String>,
}

impl Env {
    fn from_env() -> Self {
        Self {
            config_path: env::var("DDNS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
            log_level: env::var("DDNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_token: env::var("DDNS_PROVIDER_API_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "DDNS_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// Parse and validate the config file contents
fn load_config(text: &str, api_token: Option<&str>) -> Result<DdnsConfig> {
    let mut config = DdnsConfig::from_json(text).context("invalid config file")?;

    if let Some(token) = api_token {
        match config.provider {
            ProviderConfig::Cloudflare {
                ref mut api_token, ..
            } => *api_token = Some(token.to_string()),
            _ => warn!(
                "DDNS_PROVIDER_API_TOKEN is set but provider '{}' does not use it",
                config.provider.type_name()
            ),
        }
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> ExitCode {
    let env = Env::from_env();

    let log_level = match parse_log_level(&env.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    let config = match std::fs::read_to_string(&env.config_path)
        .with_context(|| format!("failed to read {}", env.config_path))
        .and_then(|text| load_config(&text, env.api_token.as_deref()))
    {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    info!("Starting ddnsd daemon");
    info!(
        "Configuration loaded from {}: {} domain(s), provider {}",
        env.config_path,
        config.domains.len(),
        config.provider.type_name()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdnsExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let collaborators = match build_collaborators(&config) {
            Ok(c) => c,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return DdnsExitCode::ConfigError;
            }
        };

        match run_daemon(config, collaborators).await {
            Ok(()) => DdnsExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DdnsExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Shared HTTP client; proxied when `use_proxy` is set
fn build_http_client(config: &DdnsConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(concat!("ddnsd/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy) = config.effective_proxy() {
        info!("Using proxy {}", proxy);
        builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
    }

    builder.build().context("failed to build HTTP client")
}

/// Register the adapters and build the configured ones
fn build_collaborators(config: &DdnsConfig) -> Result<Collaborators> {
    let client = build_http_client(config)?;
    let registry = ddns_core::ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    ddns_provider_cloudflare::register(&registry, client.clone());

    #[cfg(feature = "alidns")]
    ddns_provider_alidns::register(&registry, client.clone());

    #[cfg(feature = "http")]
    ddns_ip_http::register(&registry, client.clone());

    info!(
        "Registered providers: {:?}, IP sources: {:?}",
        registry.list_providers(),
        registry.list_ip_sources()
    );

    let provider = registry.create_provider(&config.provider)?;
    let ip_source = registry.create_ip_source(&config.ip_source, config.ip_type)?;

    Ok(Collaborators {
        ip_source: Arc::from(ip_source),
        provider: Arc::from(provider),
        resolver: build_resolver(config)?,
        notifier: build_notifier(config, client),
    })
}

#[cfg(feature = "resolver")]
fn build_resolver(config: &DdnsConfig) -> Result<Option<Arc<dyn Resolver>>> {
    match config.resolver.as_deref() {
        Some(nameserver) => {
            info!("Resolving hostnames via {}", nameserver);
            let resolver = ddns_resolver::HickoryResolver::with_nameserver(nameserver)?;
            Ok(Some(Arc::new(resolver)))
        }
        None => Ok(None),
    }
}

#[cfg(not(feature = "resolver"))]
fn build_resolver(config: &DdnsConfig) -> Result<Option<Arc<dyn Resolver>>> {
    if config.resolver.is_some() {
        warn!("resolver is configured but ddnsd was built without the resolver feature");
    }
    Ok(None)
}

#[cfg(feature = "webhook")]
fn build_notifier(config: &DdnsConfig, client: reqwest::Client) -> Arc<dyn Notifier> {
    match config.webhook {
        Some(ref webhook) => Arc::new(ddns_notify::WebhookNotifier::from_config(client, webhook)),
        None => Arc::new(LogNotifier),
    }
}

#[cfg(not(feature = "webhook"))]
fn build_notifier(config: &DdnsConfig, _client: reqwest::Client) -> Arc<dyn Notifier> {
    if config.webhook.is_some() {
        warn!("webhook is configured but ddnsd was built without the webhook feature");
    }
    Arc::new(LogNotifier)
}

/// Run the supervisor until a shutdown signal arrives
async fn run_daemon(config: DdnsConfig, collaborators: Collaborators) -> Result<()> {
    let (supervisor, events) = Supervisor::new(config, collaborators)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(log_events(events));

    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        // The supervisor may already be gone.
        let _ = shutdown_tx.send(true);
    });

    let result = supervisor.run(shutdown_rx).await;
    signals.abort();

    result?;
    info!("Shutdown complete");
    Ok(())
}

async fn log_events(mut events: mpsc::Receiver<SupervisorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SupervisorEvent::Started { domains } => info!("Reconciling {} domain(s)", domains),
            SupervisorEvent::DomainFaulted { domain, reason } => {
                warn!("Reconciler for {} faulted: {}", domain, reason)
            }
            SupervisorEvent::DomainRestarted {
                domain,
                attempt,
                delay_secs,
            } => info!(
                "Restarting reconciler for {} (attempt {}) in {}s",
                domain, attempt, delay_secs
            ),
            SupervisorEvent::DomainAbandoned { domain, restarts } => {
                error!("Gave up on {} after {} restart(s)", domain, restarts)
            }
            SupervisorEvent::Stopped { reason } => info!("Supervisor stopped: {}", reason),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOUDFLARE_CONFIG: &str = r#"{
        "provider": { "type": "cloudflare", "email": "ops@example.com", "api_key": "key" },
        "domains": [ { "domain_name": "example.com", "sub_domains": ["@", "www"] } ]
    }"#;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn env_token_overrides_the_file() {
        let config = load_config(CLOUDFLARE_CONFIG, Some("from-env")).unwrap();
        match config.provider {
            ProviderConfig::Cloudflare { api_token, .. } => {
                assert_eq!(api_token.as_deref(), Some("from-env"))
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let no_domains = r#"{
            "provider": { "type": "cloudflare", "api_token": "t" },
            "domains": []
        }"#;
        assert!(load_config(no_domains, None).is_err());
        assert!(load_config("not json", None).is_err());
    }

    #[test]
    fn proxy_only_applies_when_enabled() {
        let mut config = load_config(CLOUDFLARE_CONFIG, None).unwrap();
        config.proxy = Some("socks5://127.0.0.1:1080".to_string());
        assert!(build_http_client(&config).is_ok());

        config.use_proxy = true;
        assert_eq!(config.effective_proxy(), Some("socks5://127.0.0.1:1080"));
        assert!(build_http_client(&config).is_ok());
    }

    #[cfg(all(feature = "cloudflare", feature = "http"))]
    #[test]
    fn collaborators_build_from_a_valid_config() {
        let config = load_config(CLOUDFLARE_CONFIG, None).unwrap();
        let collaborators = build_collaborators(&config).unwrap();
        assert_eq!(collaborators.provider.provider_name(), "cloudflare");
        assert!(collaborators.resolver.is_none());
    }
}

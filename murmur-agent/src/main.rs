use murmur_agent::{follow, logging};
use murmur_core::crypto::{KeyringStorage, MemoryStorage, SessionStorage};
use murmur_core::models::Scope;
use murmur_core::{open_session, ClientConfig, HttpTransport, SyncDriver, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const LOG_DIR_VAR: &str = "MURMUR_LOG_DIR";
const KEYRING_USER_VAR: &str = "MURMUR_KEYRING_USER";
const SCOPE_VAR: &str = "MURMUR_SCOPE";

#[tokio::main]
async fn main() {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let log_dir = std::env::var_os(LOG_DIR_VAR).map(PathBuf::from);
    let _log_guard = logging::init(log_dir.as_deref());

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let scope = match std::env::var(SCOPE_VAR) {
        Ok(raw) => match raw.parse::<Scope>() {
            Ok(scope) => Some(scope),
            Err(e) => {
                warn!(error = %e, "Ignoring {}", SCOPE_VAR);
                None
            }
        },
        Err(_) => None,
    };

    let transport: Arc<dyn Transport> = match HttpTransport::new(&config) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let result = match std::env::var(KEYRING_USER_VAR) {
        Ok(user) => {
            info!(%user, "Persisting session in the OS keyring");
            run(config, transport, KeyringStorage::new(user), scope).await
        }
        Err(_) => run(config, transport, MemoryStorage::new(), scope).await,
    };

    if let Err(e) = result {
        error!(error = %e, "Agent stopped with an error");
        std::process::exit(1);
    }
}

async fn run<S: SessionStorage + 'static>(
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    storage: S,
    scope: Option<Scope>,
) -> murmur_core::Result<()> {
    let engine = open_session(&config, transport, storage).await?;
    let (handle, task) = SyncDriver::spawn(engine, &config);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
    };
    follow::follow(handle, scope, shutdown).await?;

    if let Err(e) = task.await {
        error!(error = %e, "Sync driver task panicked");
    }
    Ok(())
}

use clap::Parser;
use spore_server::config::{resolve_live_certs_path, ServerConfig};
use spore_server::hub::{run_hub, Hub};
use spore_server::store::JsonStore;
use spore_server::ws::router;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spore-server", about = "Multiplayer spore-eating game server")]
struct Args {
    /// Environment file read before the process environment
    #[arg(long, default_value = ".env")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = dotenvy::from_path(&args.config) {
        tracing::info!("No config loaded from {} ({})", args.config.display(), e);
    }

    let config = ServerConfig::from_env();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }

    let data_dir = config.resolve_data_dir();
    let store = match JsonStore::open(data_dir.join("db.json")) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store in {}: {}", data_dir.display(), e);
            std::process::exit(1);
        }
    };
    let client_dir = config.resolve_client_dir(&data_dir);
    let listen_addr = config.listen_addr();
    let tls = config.cert_path.clone().zip(config.key_path.clone());

    let (hub, hub_rx) = Hub::new(config, Arc::new(store));
    tokio::spawn(run_hub(hub.clone(), hub_rx));

    let app = router(hub, client_dir);

    if let Some((cert_path, key_path)) = tls {
        let cert_path = resolve_live_certs_path(&cert_path);
        let key_path = resolve_live_certs_path(&key_path);
        match serve_tls(app.clone(), &listen_addr, &cert_path, &key_path).await {
            Ok(()) => return,
            Err(e) => tracing::warn!("TLS server failed ({}), serving without TLS", e),
        }
    }

    tracing::info!("Starting spore server on {}", listen_addr);
    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}

/// Serve over HTTPS until the server stops. Errors if the certificate can't
/// be loaded or the server can't run.
async fn serve_tls(
    app: axum::Router,
    listen_addr: &str,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), String> {
    let addr: SocketAddr = listen_addr
        .parse()
        .map_err(|e| format!("invalid listen address {}: {}", listen_addr, e))?;
    let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| {
            format!(
                "could not load certificate {} / key {}: {}",
                cert_path.display(),
                key_path.display(),
                e
            )
        })?;

    tracing::info!("Starting spore server on https://{}", addr);
    axum_server::bind_rustls(addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| format!("server error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tls_failure_is_reported_not_fatal() {
        let missing = Path::new("/definitely/not/here.pem");
        let err = serve_tls(axum::Router::new(), "127.0.0.1:0", missing, missing)
            .await
            .unwrap_err();
        assert!(err.contains("could not load certificate"));

        let err = serve_tls(axum::Router::new(), "not an address", missing, missing)
            .await
            .unwrap_err();
        assert!(err.contains("invalid listen address"));
    }
}

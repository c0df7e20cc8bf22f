use std::path::{Path, PathBuf};

pub use spore_shared::config::WorldConfig;

/// Where a containerised deployment mounts the data volume
pub const DOCKER_DATA_DIR: &str = "/gameserver/data";
/// Where a containerised deployment mounts the certificates
pub const DOCKER_CERTS_DIR: &str = "/gameserver/certs";

/// Cost range bcrypt accepts
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub client_path: Option<PathBuf>,
    /// Outbound messages buffered per connection before new ones are dropped
    pub send_queue_capacity: usize,
    pub bcrypt_cost: u32,
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_path: None,
            cert_path: None,
            key_path: None,
            client_path: None,
            send_queue_capacity: 256,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            world: WorldConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `PORT`, `DATA_PATH`, `CERT_PATH`, `KEY_PATH` and `CLIENT_PATH`
    /// on top of the defaults. Unset or empty variables keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let path = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        };

        match lookup("PORT").map(|v| v.trim().parse::<u16>()) {
            Some(Ok(port)) => config.port = port,
            Some(Err(e)) => {
                tracing::warn!("Error parsing PORT ({}), using {}", e, config.port);
            }
            None => {}
        }
        config.data_path = path("DATA_PATH");
        config.cert_path = path("CERT_PATH");
        config.key_path = path("KEY_PATH");
        config.client_path = path("CLIENT_PATH");
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.send_queue_capacity == 0 {
            return Err("send_queue_capacity must be > 0".to_string());
        }
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(format!(
                "bcrypt_cost must be within {}..={}",
                MIN_BCRYPT_COST, MAX_BCRYPT_COST
            ));
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err("CERT_PATH and KEY_PATH must be set together".to_string());
        }
        self.world.validate()
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Data directory: the configured one if it exists, else the Docker
    /// mount, else the working directory.
    pub fn resolve_data_dir(&self) -> PathBuf {
        let mut candidates: Vec<PathBuf> = Vec::new();
        candidates.extend(self.data_path.clone());
        candidates.push(PathBuf::from(DOCKER_DATA_DIR));
        coalesce_paths(&candidates).unwrap_or_else(|| PathBuf::from("."))
    }

    /// Static client export: `CLIENT_PATH`, else `<data>/html5`.
    pub fn resolve_client_dir(&self, data_dir: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        candidates.extend(self.client_path.clone());
        candidates.push(data_dir.join("html5"));
        coalesce_paths(&candidates)
    }
}

/// First path that exists on disk.
pub fn coalesce_paths(candidates: &[PathBuf]) -> Option<PathBuf> {
    for (i, path) in candidates.iter().enumerate() {
        if path.exists() {
            tracing::info!("File/folder found at {}", path.display());
            return Some(path.clone());
        }
        match candidates.get(i + 1) {
            Some(next) => tracing::info!(
                "File/folder not found at {} - going to try {}",
                path.display(),
                next.display()
            ),
            None => tracing::info!(
                "File/folder not found at {} - no more fallbacks to try",
                path.display()
            ),
        }
    }
    None
}

/// Certificates issued by certbot live under `.../live/<domain>/`. When the
/// configured path is missing, look for the same tail under the Docker
/// certificate mount.
pub fn resolve_live_certs_path(cert_path: &Path) -> PathBuf {
    let normalized = cert_path.to_string_lossy().replace('\\', "/");
    match normalized.rsplit_once("/live/") {
        Some((_, tail)) => {
            let candidates = [
                cert_path.to_path_buf(),
                Path::new(DOCKER_CERTS_DIR).join("live").join(tail),
            ];
            coalesce_paths(&candidates).unwrap_or_else(|| cert_path.to_path_buf())
        }
        None => cert_path.to_path_buf(),
    }
}

use anyhow::{Context, Result, ensure};
use std::{env, path::PathBuf, sync::OnceLock};
use uuid::Uuid;

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// UI server configuration
    pub ui: UiConfig,

    /// TLS certificate of the web server itself
    pub certificate: CertificateConfig,

    /// Session token configuration
    pub session: SessionConfig,

    /// Host files touched by hostname and network configuration
    pub host: HostConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct CertificateConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub token_secret: String,
}

#[derive(Clone, Debug)]
pub struct HostConfig {
    pub hosts_file: PathBuf,
    pub hostname_file: PathBuf,
    pub network_file: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub data_dir: PathBuf,
    pub database_file: PathBuf,
    pub upload_dir: PathBuf,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// all configuration from environment variables.
    ///
    /// # Panics
    /// Panics if configuration loading fails. The application cannot serve
    /// anything without a valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    fn load_internal() -> Result<Self> {
        let ui = UiConfig::load()?;
        let certificate = CertificateConfig::load()?;
        let session = SessionConfig::load()?;
        let host = HostConfig::load()?;
        let paths = PathConfig::load()?;

        Ok(Self {
            ui,
            certificate,
            session,
            host,
            paths,
        })
    }
}

impl UiConfig {
    fn load() -> Result<Self> {
        let port = env::var("UI_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u16>()
            .context("failed to parse UI_PORT: invalid format")?;

        Ok(Self { port })
    }
}

impl CertificateConfig {
    fn load() -> Result<Self> {
        let cert_path = env::var("CERT_PATH")
            .unwrap_or_else(|_| "/etc/alarmdecoder/cert.pem".to_string())
            .into();

        let key_path = env::var("KEY_PATH")
            .unwrap_or_else(|_| "/etc/alarmdecoder/key.pem".to_string())
            .into();

        Ok(Self {
            cert_path,
            key_path,
        })
    }
}

/// HS256 keys shorter than 96 bits are refused when signing
const MIN_TOKEN_SECRET_BYTES: usize = 12;

impl SessionConfig {
    fn load() -> Result<Self> {
        Self::with_secret(env::var("SESSION_TOKEN_SECRET").ok())
    }

    fn with_secret(secret: Option<String>) -> Result<Self> {
        // a fresh secret invalidates all sessions of a previous process
        let token_secret = secret.unwrap_or_else(|| Uuid::new_v4().to_string());

        ensure!(
            token_secret.len() >= MIN_TOKEN_SECRET_BYTES,
            "SESSION_TOKEN_SECRET must be at least {MIN_TOKEN_SECRET_BYTES} bytes"
        );

        Ok(Self { token_secret })
    }
}

impl HostConfig {
    fn load() -> Result<Self> {
        let hosts_file = env::var("HOSTS_FILE")
            .unwrap_or_else(|_| "/etc/hosts".to_string())
            .into();
        let hostname_file = env::var("HOSTNAME_FILE")
            .unwrap_or_else(|_| "/etc/hostname".to_string())
            .into();
        let network_file = env::var("NETWORK_FILE")
            .unwrap_or_else(|_| "/etc/network/interfaces".to_string())
            .into();

        Ok(Self {
            hosts_file,
            hostname_file,
            network_file,
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let data_dir = Self::data_dir()?;

        let database_file = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("db.sqlite"));

        let upload_dir = env::var("UPLOAD_FOLDER")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("uploads"));

        std::fs::create_dir_all(&upload_dir).context("failed to create upload directory")?;

        Ok(Self {
            data_dir,
            database_file,
            upload_dir,
        })
    }

    #[cfg(not(any(test, feature = "mock")))]
    fn data_dir() -> Result<PathBuf> {
        let data_dir = PathBuf::from("/opt/alarmdecoder-webapp/instance");

        anyhow::ensure!(
            data_dir.try_exists().unwrap_or(false),
            "failed to find required data directory: {data_dir:?} is missing"
        );

        Ok(data_dir)
    }

    // In test mode, use temp directory to avoid the instance directory requirement
    #[cfg(any(test, feature = "mock"))]
    fn data_dir() -> Result<PathBuf> {
        let data_dir = std::env::temp_dir().join("alarmdecoder-webapp-test");

        std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;
        Ok(data_dir)
    }
}

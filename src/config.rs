use clap::{Parser, Subcommand, ValueEnum};
use sha2::{Digest, Sha512};
use std::path::PathBuf;
use tower_cookies::Key;

#[derive(Parser, Debug)]
#[command(name = "md-cms", about = "Edit text and markdown documents in the browser")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Selects the data root: `<root>/cms` for production, `<root>/tests` for test.
    #[arg(long = "env", env = "CMS_ENV", value_enum, default_value_t = Environment::Production)]
    pub environment: Environment,

    /// Base directory holding the `cms` and `tests` data roots.
    /// Defaults to the current directory.
    #[arg(long, env = "CMS_ROOT")]
    pub root: Option<PathBuf>,

    /// Document directory. Defaults to `<data root>/data`.
    #[arg(long, env = "CMS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Image directory. Defaults to `<data root>/img`.
    #[arg(long, env = "CMS_IMAGE_DIR")]
    pub image_dir: Option<PathBuf>,

    /// Credential file. Defaults to `<data root>/users.yaml`.
    #[arg(long, env = "CMS_USERS_FILE")]
    pub users_file: Option<PathBuf>,

    /// Secret used to sign session cookies. If unset, a random key is
    /// generated and sessions do not survive a restart.
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Largest accepted request body, in bytes (bounds image uploads).
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the web server (the default).
    Serve,
    /// Add a user to the credential file.
    AddUser {
        username: String,
        #[arg(long, env = "CMS_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Test,
}

impl Environment {
    fn dir_name(self) -> &'static str {
        match self {
            Environment::Production => "cms",
            Environment::Test => "tests",
        }
    }
}

/// Filesystem locations after applying defaults and overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub image_dir: PathBuf,
    pub users_file: PathBuf,
}

impl Args {
    pub fn paths(&self) -> Paths {
        let base = self.root.clone().unwrap_or_else(|| PathBuf::from("."));
        let data_root = base.join(self.environment.dir_name());
        Paths {
            data_dir: self
                .data_dir
                .clone()
                .unwrap_or_else(|| data_root.join("data")),
            image_dir: self
                .image_dir
                .clone()
                .unwrap_or_else(|| data_root.join("img")),
            users_file: self
                .users_file
                .clone()
                .unwrap_or_else(|| data_root.join("users.yaml")),
        }
    }

    pub fn cookie_key(&self) -> Key {
        match self.secret_key.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => key_from_secret(secret),
            None => {
                tracing::warn!("SECRET_KEY not set; sessions will not survive a restart");
                Key::generate()
            }
        }
    }
}

/// Stretch an arbitrary-length secret to the 64 bytes a cookie `Key` needs.
pub fn key_from_secret(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

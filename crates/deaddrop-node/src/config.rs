//! Node configuration loaded from environment variables.
//!
//! Everything but the user id has a default, so a node can be started with
//! `DEADDROP_USER_ID` alone for local experiments.

use std::path::PathBuf;

use anyhow::bail;
use deaddrop_client::config::parse_flag;
use deaddrop_client::ClientConfig;
use deaddrop_store::PathStyle;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identifier of the local user; names the local storage namespace.
    /// Env: `DEADDROP_USER_ID`
    /// Required.
    pub user_id: String,

    /// Root directory of the shared filesystem storage.
    /// Env: `DEADDROP_STORAGE_PATH`
    /// Default: `./deaddrop`
    pub storage_path: PathBuf,

    /// Hex-encoded X25519 secret key (64 chars).
    /// Env: `DEADDROP_SECRET_KEY`
    /// Default: none, a fresh key pair is generated on every start.
    pub secret_key: Option<String>,

    /// JSON file holding the contact roster: `[{"id": "...", "publicKey": "..."}]`.
    /// Env: `DEADDROP_ROSTER_PATH`
    /// Default: none (empty roster).
    pub roster_path: Option<PathBuf>,

    /// Store paths without dots (`5_cm`, `hb_sesj`).
    /// Env: `DEADDROP_DOT_FREE_PATHS` (true/false)
    /// Default: `false`
    pub path_style: PathStyle,

    /// Intervals, encryption switch and channel sizes of the services.
    pub client: ClientConfig,
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let user_id = std::env::var("DEADDROP_USER_ID").unwrap_or_default();
        Self::build(user_id, |name| std::env::var(name).ok())
    }

    fn build(user_id: String, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            bail!("DEADDROP_USER_ID must be set");
        }

        let storage_path = var("DEADDROP_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./deaddrop"));

        let secret_key = var("DEADDROP_SECRET_KEY").filter(|key| !key.trim().is_empty());
        let roster_path = var("DEADDROP_ROSTER_PATH").map(PathBuf::from);

        let path_style = match var("DEADDROP_DOT_FREE_PATHS") {
            Some(val) if parse_flag(&val) => PathStyle::DotFree,
            _ => PathStyle::Dotted,
        };

        Ok(Self {
            user_id,
            storage_path,
            secret_key,
            roster_path,
            path_style,
            client: ClientConfig::from_env(),
        })
    }
}

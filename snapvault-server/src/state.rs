use std::time::Instant;

use crate::auth::oauth::OauthClient;
use crate::config::Config;
use crate::store::BackupStore;

/// Shared application state. Built once in `main`; handlers only read it.
pub struct AppState {
    pub config: Config,
    pub backups: BackupStore,
    pub http: reqwest::Client,
    pub oauth: Option<OauthClient>,
    /// Server startup time for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, backups: BackupStore, http: reqwest::Client) -> Self {
        let oauth = config
            .oauth
            .clone()
            .map(|oauth_config| OauthClient::new(oauth_config, http.clone()));
        Self {
            config,
            backups,
            http,
            oauth,
            started_at: Instant::now(),
        }
    }
}

use crate::auth::oauth::OauthConfig;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PREFIX: &str = "backups/";
const DEFAULT_REGION: &str = "us-east-2";
const DEFAULT_BACKUP_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PRESIGN_TTL_SECS: u64 = 300;
const DEFAULT_LIST_MAX_KEYS: i32 = 200;
const DEFAULT_BOT_PROCESS: &str = "bot";
const DEFAULT_OAUTH_SCOPE: &str = "identify";

/// Process-wide configuration, read from the environment once at startup.
///
/// `bucket` and `session_secret` stay optional so the handlers that need
/// them can fail fast with a structured 500 instead of the process refusing
/// to boot.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bucket: Option<String>,
    pub prefix: String,
    pub region: String,
    pub s3_endpoint: Option<String>,
    pub s3_force_path_style: bool,
    pub backup_api_url: String,
    pub backup_api_key: Option<String>,
    pub presign_ttl_secs: u64,
    pub http_timeout_secs: u64,
    pub list_max_keys: i32,
    pub bot_process_name: String,
    /// The single external-identity subject allowed to sign in. Unset blocks
    /// all sign-ins.
    pub allowed_operator_id: Option<String>,
    pub session_secret: Option<String>,
    pub oauth: Option<OauthConfig>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_var("SNAPVAULT_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            bucket: env_var("BACKUP_S3_BUCKET"),
            prefix: env_var("BACKUP_S3_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            region: env_var("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            s3_endpoint: env_var("BACKUP_S3_ENDPOINT"),
            s3_force_path_style: env_flag("BACKUP_S3_FORCE_PATH_STYLE"),
            backup_api_url: env_var("BACKUP_API_URL")
                .unwrap_or_else(|| DEFAULT_BACKUP_API_URL.to_string()),
            backup_api_key: env_var("BACKUP_API_KEY"),
            presign_ttl_secs: env_var("SNAPVAULT_PRESIGN_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PRESIGN_TTL_SECS),
            http_timeout_secs: env_var("SNAPVAULT_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            list_max_keys: DEFAULT_LIST_MAX_KEYS,
            bot_process_name: env_var("SNAPVAULT_BOT_PROCESS")
                .unwrap_or_else(|| DEFAULT_BOT_PROCESS.to_string()),
            allowed_operator_id: env_var("ALLOWED_OPERATOR_ID"),
            session_secret: env_var("SESSION_SECRET"),
            oauth: oauth_from_env(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    matches!(env_var(name).as_deref(), Some("1") | Some("true") | Some("yes"))
}

/// The OAuth block is all-or-nothing: any missing endpoint disables the
/// sign-in flow rather than producing a half-configured client.
fn oauth_from_env() -> Option<OauthConfig> {
    Some(OauthConfig {
        client_id: env_var("OAUTH_CLIENT_ID")?,
        client_secret: env_var("OAUTH_CLIENT_SECRET")?,
        authorize_url: env_var("OAUTH_AUTHORIZE_URL")?,
        token_url: env_var("OAUTH_TOKEN_URL")?,
        userinfo_url: env_var("OAUTH_USERINFO_URL")?,
        redirect_url: env_var("OAUTH_REDIRECT_URL")?,
        scope: env_var("OAUTH_SCOPE").unwrap_or_else(|| DEFAULT_OAUTH_SCOPE.to_string()),
    })
}

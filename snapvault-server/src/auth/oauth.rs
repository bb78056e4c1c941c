use serde::Deserialize;

/// Endpoints and credentials of the external identity provider. The
/// provider issues the tokens; this client only drives the code flow.
#[derive(Debug, Clone)]
pub struct OauthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_url: String,
    pub scope: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OauthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider error: {0}")]
    Provider(String),
}

#[derive(Clone)]
pub struct OauthClient {
    http: reqwest::Client,
    config: OauthConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl OauthClient {
    pub fn new(config: OauthConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    /// Build the provider authorize URL, carrying the post-login target in
    /// `state`.
    pub fn authorize_redirect(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_url),
            urlencoding::encode(&self.config.scope),
            urlencoding::encode(state),
        )
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String, OauthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];

        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(OauthError::Provider(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let body: TokenResponse = resp.json().await?;
        body.access_token.ok_or_else(|| {
            OauthError::Provider(
                body.error_description
                    .or(body.error)
                    .unwrap_or_else(|| "token response missing access_token".to_string()),
            )
        })
    }

    /// Fetch the signed-in account's subject id from the userinfo endpoint.
    pub async fn fetch_subject(&self, access_token: &str) -> Result<String, OauthError> {
        let resp = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(OauthError::Provider(format!(
                "userinfo endpoint returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        body.get("id")
            .or_else(|| body.get("sub"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OauthError::Provider("userinfo response missing subject id".to_string()))
    }
}

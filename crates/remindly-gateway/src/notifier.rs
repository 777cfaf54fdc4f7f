//! Proactive messages through the provider's customer-service API.
//!
//! Every push fetches a fresh access token; nothing is cached. That is fine
//! for the occasional test push this path serves, but a high-volume sender
//! would need a token cache honouring `expires_in`.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::{CredentialError, NotifierError};

/// Provider errcode: caller IP is not whitelisted.
const ERRCODE_IP_NOT_WHITELISTED: i64 = 40164;
/// Provider errcode: API not authorized for this account.
const ERRCODE_UNAUTHORIZED: i64 = 48001;

#[derive(Debug, Clone)]
pub struct WechatConfig {
    /// Shared token used for webhook handshake signatures.
    pub token: String,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    /// e.g. `https://api.weixin.qq.com`, without trailing slash.
    pub api_base: String,
}

impl WechatConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            app_id: None,
            app_secret: None,
            api_base: "https://api.weixin.qq.com".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// An answer without `errcode` is not a success.
#[derive(Deserialize)]
struct ProviderStatus {
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: String,
}

pub struct Notifier {
    client: Client,
    config: WechatConfig,
}

impl Notifier {
    pub fn new(client: Client, config: WechatConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Fetch a short-lived access token using the app credentials.
    pub async fn fetch_access_credential(&self) -> Result<String, CredentialError> {
        let (Some(app_id), Some(secret)) = (&self.config.app_id, &self.config.app_secret) else {
            return Err(CredentialError::NotConfigured);
        };

        let resp: TokenResponse = self
            .client
            .get(self.url("/cgi-bin/token"))
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", app_id.as_str()),
                ("secret", secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match resp.access_token {
            Some(token) if !token.is_empty() => {
                debug!("Fetched provider access token");
                Ok(token)
            }
            _ => Err(CredentialError::Provider {
                code: resp.errcode,
                message: resp.errmsg,
            }),
        }
    }

    /// Send a text message to one recipient. Returns whether the provider
    /// accepted it; failures are logged, never raised, so callers can push
    /// to many recipients without aborting on one.
    pub async fn push_message(&self, recipient: &str, text: &str) -> bool {
        match self.try_push(recipient, text).await {
            Ok(()) => {
                info!("Pushed message to {}", recipient);
                true
            }
            Err(e) => {
                warn!("Push to {} failed: {}", recipient, e);
                false
            }
        }
    }

    async fn try_push(&self, recipient: &str, text: &str) -> Result<(), NotifierError> {
        let token = self.fetch_access_credential().await?;
        let body = json!({
            "touser": recipient,
            "msgtype": "text",
            "text": { "content": text },
        });

        let status: ProviderStatus = self
            .client
            .post(self.url("/cgi-bin/message/custom/send"))
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_status(status)
    }

    /// Replace the account's custom menu.
    pub async fn create_menu(&self, menu: &serde_json::Value) -> Result<(), NotifierError> {
        let token = self.fetch_access_credential().await?;

        let status: ProviderStatus = self
            .client
            .post(self.url("/cgi-bin/menu/create"))
            .query(&[("access_token", token.as_str())])
            .json(menu)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_status(status).inspect_err(|e| error!("Menu creation failed: {}", e))
    }
}

fn check_status(status: ProviderStatus) -> Result<(), NotifierError> {
    let Some(errcode) = status.errcode else {
        return Err(NotifierError::MissingErrcode);
    };
    match errcode {
        0 => Ok(()),
        ERRCODE_IP_NOT_WHITELISTED => Err(NotifierError::IpNotWhitelisted),
        ERRCODE_UNAUTHORIZED => Err(NotifierError::Unauthorized),
        code => Err(NotifierError::Provider {
            code,
            message: status.errmsg,
        }),
    }
}

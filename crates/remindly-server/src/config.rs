use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use remindly_gateway::notifier::WechatConfig;
use remindly_gateway::reply::ReplyConfig;

/// Secrets shipped in sample `.env` files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "secret"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub upstream_timeout: Duration,
    pub wechat: WechatConfig,
    pub reply: ReplyConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("REMINDLY_JWT_SECRET").context("REMINDLY_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("REMINDLY_JWT_SECRET is a placeholder; set a real secret");
        }

        let token = get("WECHAT_TOKEN").context("WECHAT_TOKEN must be set")?;

        let port: u16 = get("REMINDLY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("REMINDLY_PORT is not a valid port")?;

        let upstream_timeout = upstream_timeout(&get)?;
        let wechat = wechat_config(&get, token);

        let mut reply = ReplyConfig {
            api_key: get("AI_API_KEY"),
            ..ReplyConfig::default()
        };
        if let Some(base) = get("AI_BASE_URL") {
            reply.api_base = base;
        }
        if let Some(model) = get("AI_MODEL") {
            reply.model = model;
        }

        Ok(Self {
            host: get("REMINDLY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(get("REMINDLY_DB_PATH").unwrap_or_else(|| "remindly.db".into())),
            jwt_secret,
            upstream_timeout,
            wechat,
            reply,
        })
    }
}

/// What `create-menu` needs: app credentials only, no server secrets.
#[derive(Debug, Clone)]
pub struct MenuConfig {
    pub upstream_timeout: Duration,
    pub wechat: WechatConfig,
}

impl MenuConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let wechat = wechat_config(&get, get("WECHAT_TOKEN").unwrap_or_default());
        if wechat.app_id.is_none() || wechat.app_secret.is_none() {
            bail!("WECHAT_APP_ID and WECHAT_APP_SECRET must be set to create a menu");
        }

        Ok(Self {
            upstream_timeout: upstream_timeout(&get)?,
            wechat,
        })
    }
}

fn upstream_timeout(get: &impl Fn(&str) -> Option<String>) -> anyhow::Result<Duration> {
    let secs: u64 = get("REMINDLY_UPSTREAM_TIMEOUT_SECS")
        .unwrap_or_else(|| "5".into())
        .parse()
        .context("REMINDLY_UPSTREAM_TIMEOUT_SECS is not a number")?;
    if secs == 0 {
        bail!("REMINDLY_UPSTREAM_TIMEOUT_SECS must be positive");
    }
    Ok(Duration::from_secs(secs))
}

fn wechat_config(get: &impl Fn(&str) -> Option<String>, token: String) -> WechatConfig {
    let mut wechat = WechatConfig::new(token);
    wechat.app_id = get("WECHAT_APP_ID");
    wechat.app_secret = get("WECHAT_APP_SECRET");
    if let Some(base) = get("WECHAT_API_BASE") {
        wechat.api_base = base;
    }
    wechat
}

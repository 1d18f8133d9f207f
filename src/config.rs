use anyhow::{Context, Result, bail};
use std::env;
use std::time::Duration;

use crate::auth::AdminAllowList;
use crate::payment::PaymentAccount;

/// Where shipments and accounts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// In-process store and accounts; nothing survives a restart.
    Memory,
    Remote(RemoteBackend),
}

/// Hosted document store and identity provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBackend {
    pub store_url: String,
    pub store_api_key: String,
    pub auth_url: String,
    pub auth_api_key: String,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub admin_emails: AdminAllowList,
    pub upi_id: String,
    pub payee_name: String,
    pub backend: Backend,
    pub subscription_poll: Duration,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Environment Variables
    /// - `BIND_ADDR`: Optional - Listen address (default: "0.0.0.0:8080")
    /// - `ADMIN_EMAILS`: Optional - Comma separated admin emails (default: none)
    /// - `UPI_ID`: Required - UPI id that receives shipment payments
    /// - `PAYEE_NAME`: Optional - Payee name shown in the UPI app (default: "ShipTrack")
    /// - `BACKEND`: Optional - `memory` or `remote` (default: "memory")
    /// - `STORE_URL`: Required when remote - Document store base URL
    /// - `STORE_API_KEY`: Required when remote - Document store API key
    /// - `AUTH_URL`: Required when remote - Identity provider base URL
    /// - `AUTH_API_KEY`: Required when remote - Identity provider API key
    /// - `SUBSCRIPTION_POLL_SECS`: Optional - Live view poll interval for remote stores (default: 5)
    /// - `LOG_JSON`: Optional - Emit JSON logs (default: false)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with variables read through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Parse bind address (optional, has default)
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        // Parse admin allow-list (optional, may be empty)
        let admin_emails = AdminAllowList::parse(&lookup("ADMIN_EMAILS").unwrap_or_default());

        // Parse UPI id (required)
        let upi_id = required(&lookup, "UPI_ID")?;

        // Parse payee name (optional, has default)
        let payee_name = lookup("PAYEE_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "ShipTrack".to_string());

        // Parse backend selection (optional, has default)
        let backend = match lookup("BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => Backend::Memory,
            Some("remote") => Backend::Remote(RemoteBackend {
                store_url: required(&lookup, "STORE_URL")?,
                store_api_key: required(&lookup, "STORE_API_KEY")?,
                auth_url: required(&lookup, "AUTH_URL")?,
                auth_api_key: required(&lookup, "AUTH_API_KEY")?,
            }),
            Some(other) => bail!("BACKEND must be `memory` or `remote`, got `{}`", other),
        };

        // Parse poll interval (optional, has default)
        let poll_secs = match lookup("SUBSCRIPTION_POLL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("SUBSCRIPTION_POLL_SECS is not a number: {}", raw))?,
            None => 5,
        };
        if poll_secs == 0 {
            bail!("SUBSCRIPTION_POLL_SECS must be greater than zero");
        }

        // Parse log format (optional, has default)
        let log_json = match lookup("LOG_JSON").as_deref().map(str::trim) {
            None | Some("") => false,
            Some("1" | "true" | "TRUE" | "yes" | "YES") => true,
            Some("0" | "false" | "FALSE" | "no" | "NO") => false,
            Some(other) => bail!("LOG_JSON must be a boolean, got `{}`", other),
        };

        Ok(Config {
            bind_addr,
            admin_emails,
            upi_id,
            payee_name,
            backend,
            subscription_poll: Duration::from_secs(poll_secs),
            log_json,
        })
    }

    pub fn payment_account(&self) -> PaymentAccount {
        PaymentAccount::new(self.upi_id.clone(), self.payee_name.clone())
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).with_context(|| format!("{} not set", key))?;

    if value.trim().is_empty() {
        bail!("{} cannot be empty", key);
    }

    Ok(value.trim().to_string())
}

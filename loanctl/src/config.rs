//! Fail-fast startup configuration (spec §7 Configuration taxonomy: a
//! missing RPC url, webhook secret, or signer key aborts the process before
//! any loop starts, rather than surfacing as a runtime error later).

use std::collections::HashMap;

use loanctl_core::error::{CoreError, ErrorKind};

pub struct Config {
    pub database_path: String,
    pub signer_address: String,
    pub chain_id: u64,
    pub admin_api_key: String,
    pub webhook_secrets: HashMap<String, Vec<u8>>,
    pub bind_addr: std::net::SocketAddr,
}

fn required(key: &str) -> Result<String, CoreError> {
    std::env::var(key).map_err(|_| CoreError::new(ErrorKind::Configuration, format!("missing required env var {key}")))
}

impl Config {
    /// Loads and validates every setting this process needs before it does
    /// anything else. `.env` is loaded first (if present) but never
    /// overrides an already-set process env var.
    pub fn from_env() -> Result<Self, CoreError> {
        let _ = dotenvy::dotenv();

        let database_path = required("LOANCTL_DATABASE_PATH")?;
        let signer_address = required("LOANCTL_SIGNER_ADDRESS")?;
        let chain_id: u64 = required("LOANCTL_CHAIN_ID")?
            .parse()
            .map_err(|_| CoreError::new(ErrorKind::Configuration, "LOANCTL_CHAIN_ID must be a u64"))?;
        let admin_api_key = required("LOANCTL_ADMIN_API_KEY")?;

        let bind_addr: std::net::SocketAddr = required("LOANCTL_BIND_ADDR")?
            .parse()
            .map_err(|_| CoreError::new(ErrorKind::Configuration, "LOANCTL_BIND_ADDR must be a socket address"))?;

        // Webhook secrets are declared as `LOANCTL_WEBHOOK_SECRET_<PROVIDER>=<hex>`,
        // at least one of which must be present or no provider can ever verify.
        let mut webhook_secrets = HashMap::new();
        for (key, value) in std::env::vars() {
            let Some(provider) = key.strip_prefix("LOANCTL_WEBHOOK_SECRET_") else { continue };
            let secret = hex::decode(&value)
                .map_err(|_| CoreError::new(ErrorKind::Configuration, format!("{key} is not valid hex")))?;
            webhook_secrets.insert(provider.to_lowercase(), secret);
        }
        if webhook_secrets.is_empty() {
            return Err(CoreError::new(
                ErrorKind::Configuration,
                "no LOANCTL_WEBHOOK_SECRET_* configured; at least one provider is required",
            ));
        }

        Ok(Self { database_path, signer_address, chain_id, admin_api_key, webhook_secrets, bind_addr })
    }
}

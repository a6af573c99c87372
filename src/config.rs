use alloy_primitives::Address;
use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Knobs of a single polling pass.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub max_block_range: u64,
    pub max_look_back_blocks: u64,
    pub request_delay: Duration,
    pub quote_decimals: u8,
    pub token_decimals: u8,
    pub receipt_url_prefix: String,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            max_block_range: 30,
            max_look_back_blocks: 240,
            request_delay: Duration::from_millis(1000),
            quote_decimals: 6,
            token_decimals: 6,
            receipt_url_prefix: "https://polygonscan.com/tx/".to_string(),
        }
    }
}

impl PollSettings {
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PollSettings::default();
        let max_block_range = parse_or(&lookup, "MAX_BLOCK_RANGE", defaults.max_block_range)?;
        if max_block_range == 0 {
            bail!("MAX_BLOCK_RANGE must be at least 1");
        }

        let quote_decimals = parse_decimals(&lookup, "QUOTE_DECIMALS", defaults.quote_decimals)?;
        let token_decimals = parse_decimals(&lookup, "TOKEN_DECIMALS", defaults.token_decimals)?;

        Ok(PollSettings {
            max_block_range,
            max_look_back_blocks: parse_or(
                &lookup,
                "MAX_LOOK_BACK_BLOCKS",
                defaults.max_look_back_blocks,
            )?,
            request_delay: Duration::from_millis(parse_or(&lookup, "REQUEST_DELAY_MS", 1000)?),
            quote_decimals,
            token_decimals,
            receipt_url_prefix: lookup("RECEIPT_URL_PREFIX")
                .unwrap_or(defaults.receipt_url_prefix),
        })
    }

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }
}

/// Locations of the local state shared by the poller and the query tools.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub database_url: String,
    pub checkpoint_path: PathBuf,
    pub errors_path: PathBuf,
}

impl StoragePaths {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        StoragePaths {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:./registry.db".to_string()),
            checkpoint_path: lookup("CHECKPOINT_PATH")
                .unwrap_or_else(|| "./data/last_polled_block".to_string())
                .into(),
            errors_path: lookup("ERRORS_PATH")
                .unwrap_or_else(|| "./data/registry_errors.json".to_string())
                .into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub contract_address: Address,
    pub event_name: String,
    pub abi_path: PathBuf,
    pub database_url: String,
    pub checkpoint_path: PathBuf,
    pub errors_path: PathBuf,
    pub poll_interval: Duration,
    pub block_time: Duration,
    pub poll: PollSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let json_rpc_urls: Vec<String> = lookup("RPC_URLS")
            .or_else(|| lookup("RPC_URL"))
            .context("RPC_URLS (or RPC_URL) must be set in .env")?
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if json_rpc_urls.is_empty() {
            bail!("RPC_URLS does not contain any endpoint");
        }

        let contract_address_str =
            lookup("CONTRACT_ADDRESS").context("CONTRACT_ADDRESS must be set in .env")?;
        let contract_address = Address::from_str(contract_address_str.trim())
            .context("Invalid CONTRACT_ADDRESS format")?;

        let event_name = lookup("EVENT_NAME").unwrap_or_else(|| "TokensBought".to_string());
        let abi_path = lookup("ABI_PATH").unwrap_or_else(|| "./abis/Exchange.json".to_string());
        let storage = StoragePaths::from_vars(&lookup);

        let poll = PollSettings::from_vars(&lookup)?;
        let poll_interval_secs: u64 = parse_or(&lookup, "POLL_INTERVAL_SECS", 7)?;
        if poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECS must be at least 1");
        }

        Ok(Config {
            json_rpc_urls,
            contract_address,
            event_name,
            abi_path: PathBuf::from(abi_path),
            database_url: storage.database_url,
            checkpoint_path: storage.checkpoint_path,
            errors_path: storage.errors_path,
            poll_interval: Duration::from_secs(poll_interval_secs),
            block_time: Duration::from_secs(parse_or(&lookup, "BLOCK_TIME_SECS", 2)?),
            poll,
        })
    }

    /// Wall-clock span the look-back window roughly covers.
    pub fn look_back_estimate(&self) -> Duration {
        self.block_time
            .saturating_mul(self.poll.max_look_back_blocks.try_into().unwrap_or(u32::MAX))
    }
}

// Largest scale a uint256 amount can be formatted with.
const MAX_DECIMALS: u8 = 77;

fn parse_decimals<F>(lookup: &F, key: &str, default: u8) -> Result<u8>
where
    F: Fn(&str) -> Option<String>,
{
    let decimals = parse_or(lookup, key, default)?;
    if decimals > MAX_DECIMALS {
        bail!("{key} must be at most {MAX_DECIMALS}, got {decimals}");
    }
    Ok(decimals)
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONTRACT: &str = "0x29afc9bcce5a78fC266f184f9BA8b39E66289c61";

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let config = load(&[("RPC_URL", "http://localhost:8545"), ("CONTRACT_ADDRESS", CONTRACT)])
            .unwrap();

        assert_eq!(config.json_rpc_urls, vec!["http://localhost:8545"]);
        assert_eq!(config.event_name, "TokensBought");
        assert_eq!(config.poll.max_block_range, 30);
        assert_eq!(config.poll.max_look_back_blocks, 240);
        assert_eq!(config.poll.request_delay, Duration::from_millis(1000));
        assert_eq!(config.poll_interval, Duration::from_secs(7));
        assert_eq!(config.poll.quote_decimals, 6);
        assert_eq!(config.look_back_estimate(), Duration::from_secs(480));
    }

    #[test]
    fn rpc_urls_are_split_and_trimmed() {
        let config = load(&[
            ("RPC_URLS", "http://a:8545, http://b:8545,"),
            ("CONTRACT_ADDRESS", CONTRACT),
        ])
        .unwrap();
        assert_eq!(config.json_rpc_urls, vec!["http://a:8545", "http://b:8545"]);
    }

    #[test]
    fn missing_contract_address_is_fatal() {
        let err = load(&[("RPC_URL", "http://localhost:8545")]).unwrap_err();
        assert!(err.to_string().contains("CONTRACT_ADDRESS"));
    }

    #[test]
    fn malformed_numbers_are_fatal() {
        let err = load(&[
            ("RPC_URL", "http://localhost:8545"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("MAX_BLOCK_RANGE", "thirty"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("MAX_BLOCK_RANGE"));
    }

    #[test]
    fn storage_paths_do_not_need_rpc_settings() {
        let vars: HashMap<&str, &str> = HashMap::from([("ERRORS_PATH", "/tmp/errors.json")]);
        let paths = StoragePaths::from_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(paths.database_url, "sqlite:./registry.db");
        assert_eq!(paths.errors_path, PathBuf::from("/tmp/errors.json"));
    }

    #[test]
    fn unusable_decimals_are_fatal() {
        let err = load(&[
            ("RPC_URL", "http://localhost:8545"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("TOKEN_DECIMALS", "78"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("TOKEN_DECIMALS"));

        let config = load(&[
            ("RPC_URL", "http://localhost:8545"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("QUOTE_DECIMALS", "77"),
        ])
        .unwrap();
        assert_eq!(config.poll.quote_decimals, 77);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(
            load(&[
                ("RPC_URL", "http://localhost:8545"),
                ("CONTRACT_ADDRESS", CONTRACT),
                ("MAX_BLOCK_RANGE", "0"),
            ])
            .is_err()
        );
    }
}

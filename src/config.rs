use crate::error::ConfigError;
use crate::layout::{LayoutRegistry, StorageLayout};
use alloy::primitives::Address;
use reqwest::Url;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one indexing session needs, resolved up front.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub rpc_url: Url,
    pub contracts: Vec<Address>,
    pub start_block: u64,
    /// `0` requests a new run.
    pub run_id: i64,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub layouts: LayoutRegistry,
}

impl IndexerConfig {
    pub fn new(rpc_url: &str, contracts: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            rpc_url: validate_http_url("rpc", rpc_url)?,
            contracts: parse_contract_addresses(contracts)?,
            start_block: 0,
            run_id: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            layouts: LayoutRegistry::default(),
        })
    }

    pub fn with_start_block(mut self, start_block: u64) -> Self {
        self.start_block = start_block;
        self
    }

    pub fn with_run_id(mut self, run_id: i64) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Result<Self, ConfigError> {
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        self.poll_interval = poll_interval;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Result<Self, ConfigError> {
        if request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        self.request_timeout = request_timeout;
        Ok(self)
    }

    /// Loads `<address>=<path>` storage layout specs.
    pub fn with_layout_specs<S: AsRef<str>>(mut self, specs: &[S]) -> Result<Self, ConfigError> {
        for spec in specs {
            let (contract, path) = parse_layout_spec(spec.as_ref())?;
            let layout = StorageLayout::from_file(&path)?;
            tracing::info!(
                "[STARTUP] Loaded storage layout for {:#x} from {} ({} named slots).",
                contract,
                path.display(),
                layout.len()
            );
            self.layouts.insert(contract, layout);
        }
        Ok(self)
    }
}

pub fn validate_http_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing(format!("{name} endpoint must be set")));
    }
    let parsed = trimmed.parse::<Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{trimmed}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))),
    }
}

/// Parses a comma-separated address list.
///
/// Casing is irrelevant; duplicates are dropped keeping the first occurrence.
pub fn parse_contract_addresses(raw: &str) -> Result<Vec<Address>, ConfigError> {
    let mut contracts: Vec<Address> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let address = Address::from_str(part).map_err(|e| {
            ConfigError::Invalid(format!("invalid contract address `{part}`: {e}"))
        })?;
        if !contracts.contains(&address) {
            contracts.push(address);
        }
    }
    if contracts.is_empty() {
        return Err(ConfigError::Missing(
            "at least one contract address is required".to_string(),
        ));
    }
    Ok(contracts)
}

pub fn parse_layout_spec(raw: &str) -> Result<(Address, PathBuf), ConfigError> {
    let Some((address, path)) = raw.split_once('=') else {
        return Err(ConfigError::Invalid(format!(
            "storage layout `{raw}` must look like <address>=<path>"
        )));
    };
    let address = Address::from_str(address.trim()).map_err(|e| {
        ConfigError::Invalid(format!("invalid storage layout address `{address}`: {e}"))
    })?;
    let path = path.trim();
    if path.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "storage layout for {address:#x} has an empty path"
        )));
    }
    Ok((address, PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_addresses_trim_dedupe_and_ignore_case() {
        let contracts = parse_contract_addresses(
            " 0x17fCb0e5562c9f7dBe2799B254e0948568973B36 , 0x17FCB0E5562C9F7DBE2799B254E0948568973B36,0x17fcb0e5562c9f7dbe2799b254e0948568973b34",
        )
        .expect("valid list");
        assert_eq!(contracts.len(), 2);
        assert_eq!(
            format!("{:#x}", contracts[0]),
            "0x17fcb0e5562c9f7dbe2799b254e0948568973b36"
        );
        assert_eq!(
            format!("{:#x}", contracts[1]),
            "0x17fcb0e5562c9f7dbe2799b254e0948568973b34"
        );
    }

    #[test]
    fn test_contract_addresses_reject_empty_and_malformed() {
        assert!(matches!(
            parse_contract_addresses(" , "),
            Err(ConfigError::Missing(_))
        ));
        assert!(matches!(
            parse_contract_addresses("0x1234"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rpc_url_requires_http_scheme() {
        assert!(validate_http_url("rpc", "http://localhost:8545").is_ok());
        assert!(validate_http_url("rpc", "https://eth.example.org/v1").is_ok());
        assert!(matches!(
            validate_http_url("rpc", "ws://localhost:8546"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            validate_http_url("rpc", "  "),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_layout_spec_parsing() {
        let (address, path) =
            parse_layout_spec("0x17fCb0e5562c9f7dBe2799B254e0948568973B36=out/Token.layout.json")
                .expect("valid layout argument");
        assert_eq!(address, Address::from_str("0x17fcb0e5562c9f7dbe2799b254e0948568973b36").unwrap());
        assert_eq!(path, PathBuf::from("out/Token.layout.json"));
        assert!(parse_layout_spec("no-separator").is_err());
        assert!(parse_layout_spec("0x17fCb0e5562c9f7dBe2799B254e0948568973B36=").is_err());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let config = IndexerConfig::new(
            "http://localhost:8545",
            "0x17fCb0e5562c9f7dBe2799B254e0948568973B36",
        )
        .expect("config");
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(config.clone().with_poll_interval(Duration::ZERO).is_err());
        assert!(config.with_request_timeout(Duration::ZERO).is_err());
    }
}

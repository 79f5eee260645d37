//! Ledger endpoint configuration
use crate::address::Address;
use anyhow::Context;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;

/// The networks a ledger may be reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Sepolia,
    Ganache,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Sepolia => 11_155_111,
            Network::Ganache => 1337,
        }
    }
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            1 => Some(Network::Mainnet),
            11_155_111 => Some(Network::Sepolia),
            1337 => Some(Network::Ganache),
            _ => None,
        }
    }
    pub fn default_rpc_url(&self) -> Option<&'static str> {
        match self {
            Network::Ganache => Some("http://127.0.0.1:8545"),
            Network::Mainnet | Network::Sepolia => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Mainnet => "mainnet",
            Network::Sepolia => "sepolia",
            Network::Ganache => "ganache",
        })
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "sepolia" => Ok(Network::Sepolia),
            "ganache" | "local" => Ok(Network::Ganache),
            other => other
                .parse::<u64>()
                .ok()
                .and_then(Network::from_chain_id)
                .ok_or_else(|| anyhow::anyhow!("unsupported network: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub contract_address: Address,
    pub network: Network,
    pub rpc_url: String,
    /// `None` waits for confirmation indefinitely.
    pub confirmation_timeout: Option<Duration>,
}

impl LedgerConfig {
    pub fn local(contract_address: Address) -> Self {
        Self {
            contract_address,
            network: Network::Ganache,
            rpc_url: Network::Ganache
                .default_rpc_url()
                .unwrap_or_default()
                .to_string(),
            confirmation_timeout: Some(Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS)),
        }
    }

    /// Reads `LENDING_*` variables from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let address = lookup("LENDING_CONTRACT_ADDRESS").context("LENDING_CONTRACT_ADDRESS is not set")?;
        let contract_address = Address::parse(&address).context("LENDING_CONTRACT_ADDRESS")?;

        let network = match lookup("LENDING_NETWORK") {
            Some(name) => name.parse::<Network>()?,
            None => Network::Ganache,
        };

        let rpc_url = match lookup("LENDING_RPC_URL") {
            Some(url) => url,
            None => network
                .default_rpc_url()
                .map(str::to_string)
                .with_context(|| format!("LENDING_RPC_URL is required for {network}"))?,
        };

        let timeout_secs = match lookup("LENDING_CONFIRMATION_TIMEOUT_SECS") {
            Some(secs) => secs
                .trim()
                .parse::<u64>()
                .context("LENDING_CONFIRMATION_TIMEOUT_SECS must be a whole number of seconds")?,
            None => DEFAULT_CONFIRMATION_TIMEOUT_SECS,
        };
        let confirmation_timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        Ok(Self {
            contract_address,
            network,
            rpc_url,
            confirmation_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_the_local_network() {
        let config = LedgerConfig::from_lookup(lookup(&[(
            "LENDING_CONTRACT_ADDRESS",
            "5FbDB2315678afecb367f032d93F642f64180aa3",
        )]))
        .unwrap();

        assert_eq!(config.network, Network::Ganache);
        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(
            config.confirmation_timeout,
            Some(Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS))
        );
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("LENDING_CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("LENDING_CONFIRMATION_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.confirmation_timeout, None);
    }

    #[test]
    fn remote_networks_need_an_rpc_url() {
        let missing = LedgerConfig::from_lookup(lookup(&[
            ("LENDING_CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("LENDING_NETWORK", "sepolia"),
        ]));
        assert!(missing.is_err());

        let config = LedgerConfig::from_lookup(lookup(&[
            ("LENDING_CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("LENDING_NETWORK", "11155111"),
            ("LENDING_RPC_URL", "https://sepolia.example"),
        ]))
        .unwrap();
        assert_eq!(config.network, Network::Sepolia);
    }

    #[test]
    fn rejects_unknown_networks() {
        assert!("polygon".parse::<Network>().is_err());
        assert!("42".parse::<Network>().is_err());
        assert_eq!("Local".parse::<Network>().unwrap(), Network::Ganache);
    }
}

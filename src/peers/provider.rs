//! Node-facing providers: connected peers and known addresses.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;

use super::types::PeerRecord;
use crate::config::{ChainNetwork, Config, RPC_TIMEOUT};
use crate::error_handling::ProviderError;

/// Source of the current peer snapshot.
#[async_trait]
pub trait PeerInfoProvider: Send + Sync {
    async fn list_peers(&self) -> Result<Vec<PeerRecord>, ProviderError>;
}

/// Source of the node's address-manager contents.
#[async_trait]
pub trait AddressListProvider: Send + Sync {
    async fn list_addresses(&self) -> Result<HashSet<String>, ProviderError>;
}

#[derive(Deserialize)]
struct NodeAddress {
    #[serde(default)]
    address: String,
}

/// Talks to the node by running `bitcoin-cli`.
#[derive(Debug, Clone)]
pub struct BitcoinCli {
    cli_path: String,
    datadir: Option<String>,
    conf: Option<String>,
    network: ChainNetwork,
    timeout: Duration,
}

impl BitcoinCli {
    pub fn new(cli_path: impl Into<String>) -> Self {
        BitcoinCli {
            cli_path: cli_path.into(),
            datadir: None,
            conf: None,
            network: ChainNetwork::Main,
            timeout: RPC_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        BitcoinCli {
            cli_path: config.cli_path.clone(),
            datadir: config.datadir.clone(),
            conf: config.conf.clone(),
            network: config.network,
            timeout: RPC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments placed before every RPC method name.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(datadir) = self.datadir.as_deref().filter(|d| !d.is_empty()) {
            args.push(format!("-datadir={datadir}"));
        }
        if let Some(conf) = self.conf.as_deref().filter(|c| !c.is_empty()) {
            args.push(format!("-conf={conf}"));
        }
        if let Some(flag) = self.network.cli_flag() {
            args.push(flag.to_string());
        }
        args
    }

    /// Runs one RPC and parses its JSON output.
    async fn call<T: DeserializeOwned>(&self, rpc: &[&str]) -> Result<T, ProviderError> {
        let command = format!("{} {}", self.cli_path, rpc.join(" "));
        let mut cmd = Command::new(&self.cli_path);
        cmd.args(self.base_args()).args(rpc).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ProviderError::Timeout(command.clone()))?
            .map_err(|source| ProviderError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProviderError::NonZeroExit {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|source| ProviderError::Parse { command, source })
    }
}

#[async_trait]
impl PeerInfoProvider for BitcoinCli {
    async fn list_peers(&self) -> Result<Vec<PeerRecord>, ProviderError> {
        self.call(&["getpeerinfo"]).await
    }
}

#[async_trait]
impl AddressListProvider for BitcoinCli {
    async fn list_addresses(&self) -> Result<HashSet<String>, ProviderError> {
        let entries: Vec<NodeAddress> = self.call(&["getnodeaddresses", "0"]).await?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.address)
            .filter(|address| !address.is_empty())
            .collect())
    }
}

//! Connection context threaded through validation and orchestration
use crate::address::Address;
use crate::clock::{Clock, TimeStamp};
use crate::config::{LedgerConfig, Network};
use crate::error::{LoanError, ValidationError};
use crate::gateway::LedgerGateway;
use std::sync::Arc;

/// The acting wallet, the network it is on and the ledger to talk to.
#[derive(Clone)]
pub struct ConnectionContext {
    address: Option<Address>,
    network: Network,
    gateway: Arc<dyn LedgerGateway>,
    clock: Arc<dyn Clock>,
}

impl ConnectionContext {
    /// Connects `address` after checking the wallet's chain matches the configuration.
    pub fn connect(
        config: &LedgerConfig,
        address: Address,
        wallet_chain_id: u64,
        gateway: Arc<dyn LedgerGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LoanError> {
        let expected = config.network.chain_id();
        if wallet_chain_id != expected {
            return Err(LoanError::WrongNetwork {
                expected,
                actual: wallet_chain_id,
            });
        }
        Ok(Self {
            address: Some(address),
            network: config.network,
            gateway,
            clock,
        })
    }

    /// Read-only context with no wallet attached.
    pub fn disconnected(network: Network, gateway: Arc<dyn LedgerGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            address: None,
            network,
            gateway,
            clock,
        }
    }

    /// Same network and ledger, different wallet.
    pub fn with_address(&self, address: Address) -> Self {
        Self {
            address: Some(address),
            ..self.clone()
        }
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }
    pub fn require_address(&self) -> Result<Address, ValidationError> {
        self.address.ok_or(ValidationError::WalletNotConnected)
    }
    pub fn network(&self) -> Network {
        self.network
    }
    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
    pub fn now(&self) -> TimeStamp {
        self.clock.now()
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("address", &self.address)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

//! Contract registry and watchdog-bounded execution.

use super::interpreter::{Completed, ExecError, Interpreter};
use super::parser::{parse, Program};
use crate::blockchain::{replay_balance, Block, Blockchain};
use crate::config::ContractConfig;
use crate::error::ChainError;
use crate::hashing::sha256_hex;
use chrono::{DateTime, Utc};
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Substrings that make a contract invalid wherever they appear in the source,
/// comments and string literals included.
pub const DENYLIST: &[&str] = &[
    "import",
    "eval",
    "exec",
    "__",
    "open",
    "file",
    "system",
    "subprocess",
];

/// Stack reserved for each interpreter thread.
const WORKER_STACK_BYTES: usize = 8 * 1024 * 1024;

/// Read-only ledger access handed to running contracts.
pub trait LedgerReader: Send + Sync {
    fn get_balance(&self, address: &str) -> f64;
    fn get_block_number(&self) -> u64;
}

/// Ledger view frozen at the moment it was taken.
#[derive(Debug, Clone)]
pub struct ChainSnapshotView {
    chain: Arc<Vec<Block>>,
}

impl ChainSnapshotView {
    pub fn new(chain: Vec<Block>) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }

    pub fn of(ledger: &Blockchain) -> Self {
        Self::new(ledger.chain().to_vec())
    }
}

impl LedgerReader for ChainSnapshotView {
    fn get_balance(&self, address: &str) -> f64 {
        replay_balance(&self.chain, address)
    }

    fn get_block_number(&self) -> u64 {
        self.chain.len() as u64
    }
}

/// Parse `code` and then screen it against [`DENYLIST`].
pub fn validate_source(code: &str) -> Result<Program, ChainError> {
    let program = parse(code)?;
    if let Some(token) = DENYLIST.iter().find(|token| code.contains(*token)) {
        return Err(ChainError::ContractSecurityViolation((*token).to_string()));
    }
    Ok(program)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractOutcome {
    pub state: Map<String, Value>,
    pub gas_used: f64,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartContract {
    pub address: String,
    pub owner: String,
    pub code: String,
    pub state: Map<String, Value>,
    pub gas_used: f64,
    pub created_at: DateTime<Utc>,
    pub last_execution: Option<DateTime<Utc>>,
}

impl SmartContract {
    pub fn new(code: &str, owner: &str, created_at: DateTime<Utc>) -> Result<Self, ChainError> {
        if code.trim().is_empty() {
            return Err(ChainError::InvalidField("code".to_string()));
        }
        if owner.trim().is_empty() {
            return Err(ChainError::InvalidField("owner".to_string()));
        }
        Ok(Self {
            address: Self::derive_address(owner, code, created_at),
            owner: owner.to_string(),
            code: code.to_string(),
            state: Map::new(),
            gas_used: 0.0,
            created_at,
            last_execution: None,
        })
    }

    /// `sha256(owner ∥ code ∥ created_at)`; the same code deployed at another
    /// instant gets another address.
    pub fn derive_address(owner: &str, code: &str, created_at: DateTime<Utc>) -> String {
        let instant = created_at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
        sha256_hex(format!("{}{}{}", owner, code, instant).as_bytes())
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        validate_source(&self.code).map(drop)
    }

    /// Run the contract against `ledger` with a copy of `params`.
    ///
    /// The interpreter runs on its own thread against a copy of `state`. If it
    /// has not finished within `limits.timeout_ms`, an interrupt flag is raised
    /// that the interpreter checks before every statement, and the call fails
    /// with `ContractTimeout`. State and gas are only committed on success.
    pub fn execute(
        &mut self,
        ledger: Arc<dyn LedgerReader>,
        params: Map<String, Value>,
        limits: &ContractConfig,
    ) -> Result<ContractOutcome, ChainError> {
        let program = validate_source(&self.code).map_err(|e| {
            warn!(address = %self.address, "Contract validation failed: {}", e);
            e
        })?;

        let timeout = limits.timeout();
        let interrupt = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::bounded::<Result<Completed, ExecError>>(1);
        let started = Instant::now();
        let deadline = started + timeout;
        let state = self.state.clone();
        let flag = Arc::clone(&interrupt);

        thread::Builder::new()
            .name(format!("contract-{}", &self.address[..8.min(self.address.len())]))
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let outcome = Interpreter::new(&*ledger, params, state, &flag, deadline)
                    .run(&program);
                // The caller may have given up already.
                let _ = tx.send(outcome);
            })
            .map_err(|e| {
                ChainError::ContractExecutionFailed(format!("could not start worker: {}", e))
            })?;

        let completed = match rx.recv_timeout(timeout) {
            Ok(Ok(completed)) => completed,
            Ok(Err(ExecError::Interrupted)) | Err(RecvTimeoutError::Timeout) => {
                interrupt.store(true, Ordering::Relaxed);
                warn!(address = %self.address, timeout_ms = limits.timeout_ms, "Contract execution timed out");
                return Err(ChainError::ContractTimeout(limits.timeout_ms));
            }
            Ok(Err(ExecError::Fault(cause))) => {
                warn!(address = %self.address, "Contract execution failed: {}", cause);
                return Err(ChainError::ContractExecutionFailed(cause));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ChainError::ContractExecutionFailed(
                    "contract worker terminated unexpectedly".to_string(),
                ));
            }
        };

        let elapsed = started.elapsed();
        self.state = completed.state;
        self.gas_used += gas_for(elapsed, limits.gas_multiplier);
        self.last_execution = Some(Utc::now());
        info!(
            address = %self.address,
            elapsed_ms = elapsed.as_millis() as u64,
            gas_used = self.gas_used,
            "Contract executed"
        );

        Ok(ContractOutcome {
            state: self.state.clone(),
            gas_used: self.gas_used,
            result: completed.result,
        })
    }
}

fn gas_for(elapsed: Duration, multiplier: f64) -> f64 {
    elapsed.as_secs_f64() * multiplier
}

/// All deployed contracts, keyed by address.
#[derive(Debug, Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, SmartContract>,
    limits: ContractConfig,
}

impl ContractRegistry {
    pub fn new(limits: ContractConfig) -> Self {
        Self {
            contracts: HashMap::new(),
            limits,
        }
    }

    pub fn deploy(&mut self, code: &str, owner: &str) -> Result<String, ChainError> {
        self.deploy_at(code, owner, Utc::now())
    }

    /// Validate and register a contract created at `created_at`.
    pub fn deploy_at(
        &mut self,
        code: &str,
        owner: &str,
        created_at: DateTime<Utc>,
    ) -> Result<String, ChainError> {
        let contract = SmartContract::new(code, owner, created_at)?;
        if let Err(e) = contract.validate() {
            warn!(owner, "Rejected contract deployment: {}", e);
            return Err(e);
        }
        if self.contracts.contains_key(&contract.address) {
            return Err(ChainError::InvalidField(format!(
                "address {} already registered",
                contract.address
            )));
        }
        let address = contract.address.clone();
        info!(address = %address, owner, "Contract deployed");
        self.contracts.insert(address.clone(), contract);
        Ok(address)
    }

    pub fn get(&self, address: &str) -> Option<&SmartContract> {
        self.contracts.get(address)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn execute(
        &mut self,
        address: &str,
        ledger: Arc<dyn LedgerReader>,
        params: Map<String, Value>,
    ) -> Result<ContractOutcome, ChainError> {
        let contract = self
            .contracts
            .get_mut(address)
            .ok_or_else(|| ChainError::ContractNotFound(address.to_string()))?;
        debug!(address, "Executing contract");
        contract.execute(ledger, params, &self.limits)
    }
}

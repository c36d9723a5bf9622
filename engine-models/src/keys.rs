// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::constants::{CROSS_PROCESS_PREFIX, KEY_SEPARATOR, ORIGIN_PROCESS_PREFIX};
use crate::error::ModelsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a bytecode artifact and the request group serving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractKey {
    /// chain the contract lives on
    pub chain_id: String,
    /// contract name
    pub contract_name: String,
    /// contract version
    pub contract_version: String,
}

impl ContractKey {
    /// Builds a key, rejecting empty components and components containing the separator.
    pub fn new(
        chain_id: impl Into<String>,
        contract_name: impl Into<String>,
        contract_version: impl Into<String>,
    ) -> Result<Self, ModelsError> {
        let key = ContractKey {
            chain_id: chain_id.into(),
            contract_name: contract_name.into(),
            contract_version: contract_version.into(),
        };
        key.check()?;
        Ok(key)
    }

    fn check(&self) -> Result<(), ModelsError> {
        for part in [&self.chain_id, &self.contract_name, &self.contract_version] {
            if part.is_empty() || part.contains(KEY_SEPARATOR) {
                return Err(ModelsError::InvalidContractKey(format!(
                    "{}{}{}{}{}",
                    self.chain_id,
                    KEY_SEPARATOR,
                    self.contract_name,
                    KEY_SEPARATOR,
                    self.contract_version
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.chain_id, KEY_SEPARATOR, self.contract_name, KEY_SEPARATOR, self.contract_version
        )
    }
}

impl FromStr for ContractKey {
    type Err = ModelsError;

    /// ```
    /// # use engine_models::ContractKey;
    /// let key: ContractKey = "chain1#counter#v1".parse().unwrap();
    /// assert_eq!(key.contract_name, "counter");
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(chain_id), Some(name), Some(version), None) => {
                ContractKey::new(chain_id, name, version)
            }
            _ => Err(ModelsError::InvalidContractKey(s.to_string())),
        }
    }
}

/// Identifies an in-flight invocation across every chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueTxKey {
    /// chain that submitted the tx
    pub chain_id: String,
    /// tx id, unique per chain
    pub tx_id: String,
}

impl UniqueTxKey {
    /// Builds a tx key
    pub fn new(chain_id: impl Into<String>, tx_id: impl Into<String>) -> Self {
        UniqueTxKey {
            chain_id: chain_id.into(),
            tx_id: tx_id.into(),
        }
    }

    /// Id of the `seq`-th child tx spawned by this one through a cross-contract call.
    pub fn child(&self, seq: u64) -> UniqueTxKey {
        UniqueTxKey {
            chain_id: self.chain_id.clone(),
            tx_id: format!("{}{}{}", self.tx_id, KEY_SEPARATOR, seq),
        }
    }
}

impl fmt::Display for UniqueTxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.chain_id, KEY_SEPARATOR, self.tx_id)
    }
}

/// Stable, globally unique name of a sandbox process.
/// This is the only handle the sandbox knows itself by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessName(String);

impl ProcessName {
    /// Name of the `index`-th process of the origin or cross pool.
    ///
    /// ```
    /// # use engine_models::ProcessName;
    /// assert_eq!(ProcessName::new(true, 7).as_str(), "orig-000007");
    /// assert_eq!(ProcessName::new(false, 12).as_str(), "cross-000012");
    /// ```
    pub fn new(is_orig: bool, index: u64) -> Self {
        let prefix = if is_orig {
            ORIGIN_PROCESS_PREFIX
        } else {
            CROSS_PROCESS_PREFIX
        };
        ProcessName(format!("{}-{:06}", prefix, index))
    }

    /// textual form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// whether the name belongs to the origin pool
    pub fn is_orig(&self) -> bool {
        self.0.starts_with(ORIGIN_PROCESS_PREFIX)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProcessName {
    type Err = ModelsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s
            .split_once('-')
            .map(|(prefix, index)| {
                (prefix == ORIGIN_PROCESS_PREFIX || prefix == CROSS_PROCESS_PREFIX)
                    && !index.is_empty()
                    && index.chars().all(|c| c.is_ascii_digit())
            })
            .unwrap_or(false);
        if valid {
            Ok(ProcessName(s.to_string()))
        } else {
            Err(ModelsError::InvalidProcessName(s.to_string()))
        }
    }
}

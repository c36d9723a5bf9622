// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::keys::ContractKey;
use std::path::PathBuf;

/// A published bytecode file.
///
/// `path` and `file_version` are only ever handed out together once the file
/// is fully written, so holders never see a torn pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    /// contract the bytes belong to
    pub key: ContractKey,
    /// location of the bytecode on local disk
    pub path: PathBuf,
    /// generation of the bytecode, non-decreasing per key
    pub file_version: i64,
}

impl ContractArtifact {
    /// whether this artifact can serve a tx observed at `contract_index`
    pub fn serves(&self, contract_index: i64) -> bool {
        self.file_version >= contract_index
    }
}

// Copyright (c) 2023 MASSA LABS <info@massa.net>

use engine_models::constants::KEY_SEPARATOR;
use engine_models::{ContractArtifact, ContractKey};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const TMP_SUFFIX: &str = ".tmp";

/// Whether a key component can be used verbatim in a file name.
fn is_path_safe(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.starts_with('.')
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn sanitize(part: &str) -> String {
    if is_path_safe(part) {
        return part.to_string();
    }
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("_{}", cleaned)
}

/// On-disk bytecode store.
///
/// Layout: `<root>/<chain_id>/<contract_name>#<contract_version>#<file_version>`.
/// Files are written under a dot-prefixed temp name and renamed into place.
#[derive(Debug, Clone)]
pub(crate) struct HdCache {
    root: PathBuf,
}

impl HdCache {
    pub fn new(root: PathBuf) -> Self {
        HdCache { root }
    }

    fn chain_dir(&self, chain_id: &str) -> PathBuf {
        self.root.join(sanitize(chain_id))
    }

    fn file_name(key: &ContractKey, file_version: i64) -> String {
        format!(
            "{}{}{}{}{}",
            sanitize(&key.contract_name),
            KEY_SEPARATOR,
            sanitize(&key.contract_version),
            KEY_SEPARATOR,
            file_version
        )
    }

    pub fn path_for(&self, key: &ContractKey, file_version: i64) -> PathBuf {
        self.chain_dir(&key.chain_id)
            .join(Self::file_name(key, file_version))
    }

    /// Writes the bytes of `key` at `file_version` and returns the published path.
    pub async fn write_atomic(
        &self,
        key: &ContractKey,
        file_version: i64,
        bytes: &[u8],
    ) -> io::Result<PathBuf> {
        let dir = self.chain_dir(&key.chain_id);
        tokio::fs::create_dir_all(&dir).await?;
        let file_name = Self::file_name(key, file_version);
        let final_path = dir.join(&file_name);
        let tmp_path = dir.join(format!(".{}{}", file_name, TMP_SUFFIX));

        let res = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &final_path).await
        }
        .await;
        if let Err(e) = res {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        Ok(final_path)
    }

    /// Removes the files of `key` older than `keep_file_version`.
    /// Sandboxes already running older bytecode loaded it in memory.
    pub async fn remove_older(&self, key: &ContractKey, keep_file_version: i64) {
        let prefix = format!(
            "{}{}{}{}",
            sanitize(&key.contract_name),
            KEY_SEPARATOR,
            sanitize(&key.contract_version),
            KEY_SEPARATOR
        );
        let dir = self.chain_dir(&key.chain_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("could not list {}: {}", dir.display(), e);
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(version) = name.strip_prefix(&prefix) else {
                continue;
            };
            match version.parse::<i64>() {
                Ok(v) if v < keep_file_version => {
                    if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                        warn!("could not remove stale bytecode {}: {}", name, e);
                    }
                }
                _ => {}
            }
        }
    }

    /// Lists the newest artifact of every key found under the root.
    /// Leftover temp files are deleted and unparsable names skipped.
    pub fn scan(&self) -> io::Result<Vec<ContractArtifact>> {
        let mut newest: std::collections::HashMap<ContractKey, ContractArtifact> =
            Default::default();
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        for chain_entry in std::fs::read_dir(&self.root)? {
            let chain_entry = chain_entry?;
            if !chain_entry.file_type()?.is_dir() {
                continue;
            }
            let chain_id = chain_entry.file_name().to_string_lossy().into_owned();
            if !is_path_safe(&chain_id) {
                continue;
            }
            for file_entry in std::fs::read_dir(chain_entry.path())? {
                let file_entry = file_entry?;
                let name = file_entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') && name.ends_with(TMP_SUFFIX) {
                    let _ = std::fs::remove_file(file_entry.path());
                    continue;
                }
                let Some(artifact) = parse_file_name(&chain_id, &name, &file_entry.path()) else {
                    continue;
                };
                match newest.get(&artifact.key) {
                    Some(known) if known.file_version >= artifact.file_version => {}
                    _ => {
                        newest.insert(artifact.key.clone(), artifact);
                    }
                }
            }
        }
        Ok(newest.into_values().collect())
    }
}

fn parse_file_name(chain_id: &str, name: &str, path: &Path) -> Option<ContractArtifact> {
    let mut parts = name.split(KEY_SEPARATOR);
    let (contract_name, contract_version, file_version) =
        (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || !is_path_safe(contract_name) || !is_path_safe(contract_version)
    {
        return None;
    }
    Some(ContractArtifact {
        key: ContractKey::new(chain_id, contract_name, contract_version).ok()?,
        path: path.to_path_buf(),
        file_version: file_version.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_components_are_sanitized() {
        assert_eq!(sanitize("counter"), "counter");
        assert_eq!(sanitize("v1.0"), "v1.0");
        assert_eq!(sanitize("../etc"), "____etc");
        assert_eq!(sanitize("a/b"), "_a_b");
        let cache = HdCache::new(PathBuf::from("/cache"));
        let key = ContractKey::new("chain1", "../../x", "v1").unwrap();
        let path = cache.path_for(&key, 2);
        assert!(path.starts_with("/cache/chain1"));
        assert_eq!(path.components().count(), 4);
    }

    #[tokio::test]
    async fn test_write_scan_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HdCache::new(dir.path().to_path_buf());
        let key = ContractKey::new("chain1", "counter", "v1").unwrap();
        let p1 = cache.write_atomic(&key, 1, b"one").await.unwrap();
        let p3 = cache.write_atomic(&key, 3, b"three").await.unwrap();
        assert_eq!(std::fs::read(&p1).unwrap(), b"one");
        std::fs::write(p1.with_file_name(".leftover.tmp"), b"x").unwrap();

        let scanned = cache.scan().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].file_version, 3);
        assert_eq!(scanned[0].path, p3);
        assert!(!p1.with_file_name(".leftover.tmp").exists());

        cache.remove_older(&key, 3).await;
        assert!(!p1.exists());
        assert!(p3.exists());
    }
}

// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::{ContractKey, ModelsError, ProcessName, UniqueTxKey};
use std::collections::HashSet;

#[test]
fn test_contract_key_display_parse() {
    let key = ContractKey::new("chain1", "counter", "v1").unwrap();
    assert_eq!(key.to_string(), "chain1#counter#v1");
    let parsed: ContractKey = "chain1#counter#v1".parse().unwrap();
    assert_eq!(parsed, key);
}

#[test]
fn test_contract_key_rejects_bad_input() {
    assert!(matches!(
        "chain1#counter".parse::<ContractKey>(),
        Err(ModelsError::InvalidContractKey(_))
    ));
    assert!("a#b#c#d".parse::<ContractKey>().is_err());
    assert!(ContractKey::new("chain1", "", "v1").is_err());
    assert!(ContractKey::new("chain1", "na#me", "v1").is_err());
}

#[test]
fn test_child_tx_ids_are_unique() {
    let root = UniqueTxKey::new("chain1", "T");
    let first = root.child(1);
    let second = root.child(2);
    assert_eq!(first.tx_id, "T#1");
    assert_ne!(first, second);
    assert_eq!(first.child(1).tx_id, "T#1#1");
    assert_eq!(first.chain_id, "chain1");
}

#[test]
fn test_process_names() {
    let names: HashSet<ProcessName> = (0..50)
        .flat_map(|i| [ProcessName::new(true, i), ProcessName::new(false, i)])
        .collect();
    assert_eq!(names.len(), 100);
    let orig = ProcessName::new(true, 3);
    assert!(orig.is_orig());
    assert!(!ProcessName::new(false, 3).is_orig());
    assert_eq!(orig.as_str().parse::<ProcessName>().unwrap(), orig);
    assert!("sandbox-1".parse::<ProcessName>().is_err());
    assert!("orig-".parse::<ProcessName>().is_err());
}

//! Storage pool configuration parser
//!
//! Desired storage pools are declared in a compact textual form: a
//! whitespace-separated list of pool entries, each entry a comma-separated
//! list of `key=value` tokens.
//!
//! ```text
//! provider=lvmthin,provider_name=storage/thinpool,name=thinpool
//! name=ssds,provider=zfs,provider_name=ssds,devices=/dev/sdc,devices=/dev/sdd
//! ```
//!
//! Parsing is a pure function with no side effects; it is safe (and
//! expected) to run on every reconciliation pass.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Storage Pool Spec
// =============================================================================

/// Desired state for a single storage pool on the local node.
///
/// Entries keep their textual order and are not deduplicated by name;
/// convergence treats each record as a create-if-absent candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePoolSpec {
    /// Pool name, unique per node
    pub name: String,
    /// Provider kind backing the pool (e.g. lvm, lvmthin, zfs, diskless)
    pub provider: String,
    /// Provider-side pool name, passed through verbatim when set
    pub provider_name: Option<String>,
    /// Backing device paths; empty means the provider pool already exists
    pub devices: Vec<String>,
}

// =============================================================================
// Parser
// =============================================================================

/// Parse the storage-pool config option into desired-state records.
///
/// Empty input produces an empty vec. An unrecognized key or an entry
/// missing `name` or `provider` fails with [`Error::ConfigParse`].
pub fn parse_storage_pool_config(conf: &str) -> Result<Vec<StoragePoolSpec>> {
    let mut pools = Vec::new();

    for entry in conf.split_whitespace() {
        let mut name = None;
        let mut provider = None;
        let mut provider_name = None;
        let mut devices = Vec::new();

        for token in entry.split(',') {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                Error::ConfigParse(format!("expected key=value, got '{token}'"))
            })?;

            match key {
                "name" => name = Some(value.to_string()),
                "provider" => provider = Some(value.to_string()),
                "provider_name" => provider_name = Some(value.to_string()),
                "devices" => devices.push(value.to_string()),
                _ => {
                    return Err(Error::ConfigParse(format!(
                        "unknown key '{key}' in pool entry '{entry}'"
                    )))
                }
            }
        }

        let name = name.ok_or_else(|| {
            Error::ConfigParse(format!("pool entry '{entry}' is missing 'name'"))
        })?;
        let provider = provider.ok_or_else(|| {
            Error::ConfigParse(format!("pool entry '{entry}' is missing 'provider'"))
        })?;

        pools.push(StoragePoolSpec {
            name,
            provider,
            provider_name,
            devices,
        });
    }

    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_storage_pool_config("").unwrap(), vec![]);
        assert_eq!(parse_storage_pool_config("   \n\t ").unwrap(), vec![]);
    }

    #[test]
    fn test_parse_single_pool() {
        let pools =
            parse_storage_pool_config("provider=lvmthin,provider_name=storage/thinpool,name=thinpool")
                .unwrap();
        assert_eq!(
            pools,
            vec![StoragePoolSpec {
                name: "thinpool".into(),
                provider: "lvmthin".into(),
                provider_name: Some("storage/thinpool".into()),
                devices: vec![],
            }]
        );
    }

    #[test]
    fn test_parse_multiple_pools_with_devices() {
        let pools = parse_storage_pool_config(
            "provider=lvmthin,provider_name=storage/thinpool,name=thinpool \
             name=ssds,provider=zfs,provider_name=ssds,devices=/dev/sdc,devices=/dev/sdd",
        )
        .unwrap();
        assert_eq!(
            pools,
            vec![
                StoragePoolSpec {
                    name: "thinpool".into(),
                    provider: "lvmthin".into(),
                    provider_name: Some("storage/thinpool".into()),
                    devices: vec![],
                },
                StoragePoolSpec {
                    name: "ssds".into(),
                    provider: "zfs".into(),
                    provider_name: Some("ssds".into()),
                    devices: vec!["/dev/sdc".into(), "/dev/sdd".into()],
                },
            ]
        );
    }

    #[test]
    fn test_parse_preserves_order_and_duplicates() {
        let pools = parse_storage_pool_config(
            "name=a,provider=lvm name=a,provider=zfs name=b,provider=lvm",
        )
        .unwrap();
        let names: Vec<_> = pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "a", "b"]);
    }

    #[test]
    fn test_parse_missing_name() {
        let err = parse_storage_pool_config("provider=lvm,devices=/dev/sdb").unwrap_err();
        assert_matches!(err, Error::ConfigParse(_));
    }

    #[test]
    fn test_parse_missing_provider() {
        let err = parse_storage_pool_config("name=pool0,devices=/dev/sdb").unwrap_err();
        assert_matches!(err, Error::ConfigParse(_));
    }

    #[test]
    fn test_parse_unknown_key() {
        let err = parse_storage_pool_config("name=pool0,provider=lvm,devics=/dev/sdb").unwrap_err();
        assert_matches!(err, Error::ConfigParse(_));
    }

    #[test]
    fn test_parse_bare_token() {
        let err = parse_storage_pool_config("name=pool0,provider").unwrap_err();
        assert_matches!(err, Error::ConfigParse(_));
    }
}

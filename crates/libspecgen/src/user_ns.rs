use std::num::ParseIntError;

use crate::config::IdMap;

/// The gid the `/dev/pts` mount hands terminals to by default.
pub const TTY_GID: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum IdMapError {
    #[error("id map line {line:?} must have three fields")]
    Fields { line: String },
    #[error("id map line {line:?} is not numeric")]
    Number {
        line: String,
        source: ParseIntError,
    },
}

/// Parses the `/proc/<pid>/{uid,gid}_map` format: one
/// `container_id host_id size` triple per line.
pub fn parse_id_map(contents: &str) -> Result<Vec<IdMap>, IdMapError> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [container_id, host_id, size] = fields[..] else {
                return Err(IdMapError::Fields {
                    line: line.to_owned(),
                });
            };
            let number = |field: &str| {
                field.parse::<u32>().map_err(|source| IdMapError::Number {
                    line: line.to_owned(),
                    source,
                })
            };
            Ok(IdMap {
                container_id: number(container_id)?,
                host_id: number(host_id)?,
                size: number(size)?,
            })
        })
        .collect()
}

/// Total number of ids covered by `maps`.
pub fn mapped_ids(maps: &[IdMap]) -> u64 {
    maps.iter().map(|m| u64::from(m.size)).sum()
}

/// Whether gid 5 will exist inside the container. `host_gids` is the number
/// of gids available to a rootless caller and `None` when running as root.
pub fn gid5_available(host_gids: Option<u64>, gid_map: &[IdMap]) -> bool {
    if let Some(available) = host_gids {
        if available < u64::from(TTY_GID) {
            return false;
        }
    }
    gid_map.is_empty() || gid_map.iter().any(|m| m.contains_container_id(TTY_GID))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn map(container_id: u32, host_id: u32, size: u32) -> IdMap {
        IdMap {
            container_id,
            host_id,
            size,
        }
    }

    #[test]
    fn test_parse_proc_id_map() -> Result<()> {
        let maps = parse_id_map("         0       1000          1\n         1     100000      65536\n")?;
        assert_eq!(maps, vec![map(0, 1000, 1), map(1, 100000, 65536)]);
        assert_eq!(mapped_ids(&maps), 65537);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(matches!(
            parse_id_map("0 1000").unwrap_err(),
            IdMapError::Fields { .. }
        ));
        assert!(matches!(
            parse_id_map("0 x 1").unwrap_err(),
            IdMapError::Number { .. }
        ));
    }

    #[test]
    fn test_gid5_as_root_without_maps() {
        assert!(gid5_available(None, &[]));
    }

    #[test]
    fn test_gid5_needs_enough_host_gids() {
        assert!(!gid5_available(Some(1), &[]));
        assert!(!gid5_available(Some(4), &[]));
        assert!(gid5_available(Some(5), &[]));
        assert!(gid5_available(Some(65537), &[]));
    }

    #[test]
    fn test_gid5_must_be_mapped() {
        assert!(!gid5_available(None, &[map(0, 1000, 1)]));
        assert!(gid5_available(None, &[map(0, 1000, 1), map(1, 100000, 65536)]));
        assert!(!gid5_available(Some(65537), &[map(6, 100000, 10)]));
    }
}

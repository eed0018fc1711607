//! Placement
//!
//! Maps a filename to the ordered set of nodes responsible for holding it.
//! The salted filename is hashed with SHA-256, the digest is read as a
//! big-endian integer and reduced modulo the member count to pick the
//! primary; the remaining replicas follow it around the sorted member ring.

use sha2::{Digest, Sha256};

use crate::config::{PlacementSalt, SyncConfig};
use crate::error::{Error, Result};

/// Deterministic filename -> responsible nodes resolver
#[derive(Debug, Clone)]
pub struct Placement {
    /// Member ids, sorted and deduplicated
    members: Vec<String>,
    /// Suffix appended to the filename before hashing, if any
    salt: Option<String>,
    /// Default replication factor
    replication_factor: usize,
}

impl Placement {
    /// Create a resolver over `members`
    pub fn new<I, S>(members: I, salt: Option<String>, replication_factor: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut members: Vec<String> = members.into_iter().map(Into::into).collect();
        members.sort();
        members.dedup();

        if members.is_empty() {
            return Err(Error::Config("placement requires at least one cluster member".into()));
        }
        if replication_factor == 0 {
            return Err(Error::Config("replication factor must be at least 1".into()));
        }

        Ok(Self {
            members,
            salt,
            replication_factor,
        })
    }

    /// Build the resolver described by the cluster configuration
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let salt = match config.cluster.placement_salt {
            PlacementSalt::Shared => None,
            PlacementSalt::Cluster => config.cluster.placement_salt_value.clone(),
            PlacementSalt::LocalNode => Some(config.node.id.clone()),
        };

        Self::new(
            config.cluster.nodes.keys().cloned(),
            salt,
            config.cluster.replication_factor,
        )
    }

    /// Sorted member ids
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Configured replication factor
    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Responsible nodes for `filename` using the configured replication factor
    pub fn responsible(&self, filename: &str) -> Vec<String> {
        self.responsible_nodes(filename, self.replication_factor)
    }

    /// Responsible nodes for `filename`, primary first.
    ///
    /// Returns `min(replication_factor, members)` distinct ids.
    pub fn responsible_nodes(&self, filename: &str, replication_factor: usize) -> Vec<String> {
        let count = self.members.len();
        let primary = self.primary_index(filename);

        (0..replication_factor.min(count))
            .map(|i| self.members[(primary + i) % count].clone())
            .collect()
    }

    /// Primary node for `filename`
    pub fn primary_of(&self, filename: &str) -> &str {
        &self.members[self.primary_index(filename)]
    }

    /// Whether `node_id` is in the responsible set of `filename`
    pub fn is_responsible(&self, filename: &str, node_id: &str) -> bool {
        self.responsible(filename).iter().any(|id| id == node_id)
    }

    fn placement_key(&self, filename: &str) -> String {
        match &self.salt {
            Some(salt) => format!("{}-{}", filename, salt),
            None => filename.to_string(),
        }
    }

    fn primary_index(&self, filename: &str) -> usize {
        let digest = Sha256::digest(self.placement_key(filename).as_bytes());
        digest_mod(&digest, self.members.len() as u64) as usize
    }
}

/// Reduce a big-endian integer modulo `modulus` without a bignum type
fn digest_mod(bytes: &[u8], modulus: u64) -> u64 {
    let modulus = modulus as u128;
    bytes
        .iter()
        .fold(0u128, |acc, &b| ((acc << 8) | b as u128) % modulus) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn four_nodes() -> Vec<&'static str> {
        vec!["node3", "node1", "node4", "node2"]
    }

    #[test]
    fn test_digest_mod_matches_small_integers() {
        assert_eq!(digest_mod(&[0x01, 0x00], 7), 256 % 7);
        assert_eq!(digest_mod(&[0xff; 4], 1000), 0xffff_ffffu64 % 1000);
        assert_eq!(digest_mod(&[0xab; 32], 1), 0);
    }

    #[test]
    fn test_deterministic_and_distinct() {
        let placement = Placement::new(four_nodes(), None, 4).unwrap();

        for name in ["report.csv", "a.txt", "photo.jpg", "notes", "x.tar.gz"] {
            let first = placement.responsible_nodes(name, 3);
            let second = placement.responsible_nodes(name, 3);
            assert_eq!(first, second);
            assert_eq!(first.len(), 3);

            let unique: HashSet<_> = first.iter().collect();
            assert_eq!(unique.len(), 3, "duplicate node in {:?}", first);
        }
    }

    #[test]
    fn test_replicas_follow_sorted_ring() {
        let placement = Placement::new(four_nodes(), None, 4).unwrap();
        let set = placement.responsible("report.csv");
        let members = placement.members();
        assert_eq!(members, &["node1", "node2", "node3", "node4"]);

        let start = members.iter().position(|m| m == &set[0]).unwrap();
        for (i, id) in set.iter().enumerate() {
            assert_eq!(id, &members[(start + i) % 4]);
        }
        assert_eq!(placement.primary_of("report.csv"), set[0]);
    }

    #[test]
    fn test_replication_factor_capped_by_membership() {
        let placement = Placement::new(["a", "b"], None, 4).unwrap();
        let set = placement.responsible("file.bin");
        assert_eq!(set.len(), 2);
        assert_ne!(set[0], set[1]);
    }

    #[test]
    fn test_empty_membership_rejected() {
        let result = Placement::new(Vec::<String>::new(), None, 2);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_shared_salt_agrees_across_nodes() {
        let mut nodes = std::collections::BTreeMap::new();
        for id in ["node1", "node2", "node3", "node4"] {
            nodes.insert(id.to_string(), format!("{}:5000", id));
        }

        let sets: Vec<Vec<String>> = ["node1", "node2", "node3", "node4"]
            .iter()
            .map(|id| {
                let config = SyncConfig::new(*id, "/tmp/unused", nodes.clone());
                Placement::from_config(&config).unwrap().responsible("report.csv")
            })
            .collect();

        assert!(sets.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_local_node_salt_uses_own_identity() {
        let mut nodes = std::collections::BTreeMap::new();
        for id in ["node1", "node2"] {
            nodes.insert(id.to_string(), format!("{}:5000", id));
        }
        let mut config = SyncConfig::new("node2", "/tmp/unused", nodes);
        config.cluster.placement_salt = PlacementSalt::LocalNode;

        let from_config = Placement::from_config(&config).unwrap();
        let explicit = Placement::new(["node1", "node2"], Some("node2".to_string()), 4).unwrap();
        assert_eq!(from_config.responsible("a.txt"), explicit.responsible("a.txt"));
    }
}

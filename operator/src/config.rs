//! Canonical configuration rendering and the config-hash protocol.
//!
//! Every rendered payload is byte-identical for identical inputs: maps are
//! emitted in lexicographic key order and user-provided keys override the
//! defaults. The SHA-256 of the canonical render is what gets stamped on
//! workload pod templates.

use std::collections::BTreeMap;

use redis_operator_types::{ClusterTuning, SentinelTuning, ports};

/// File name the Redis config is mounted under.
pub const REDIS_CONF: &str = "redis.conf";
/// File name the sentinel config is mounted under.
pub const SENTINEL_CONF: &str = "sentinel.conf";

/// Baseline configuration for a single Redis node. User config overrides
/// any of these per key.
const DEFAULT_REDIS_CONFIG: &[(&str, &str)] = &[
    ("appendfsync", "everysec"),
    ("appendonly", "yes"),
    ("bind", "0.0.0.0"),
    ("databases", "16"),
    ("dbfilename", "dump.rdb"),
    ("dir", "/data"),
    ("maxmemory-policy", "noeviction"),
    ("port", "6379"),
    ("rdbchecksum", "yes"),
    ("rdbcompression", "yes"),
    ("save", "900 1 300 10 60 10000"),
    ("stop-writes-on-bgsave-error", "yes"),
    ("tcp-backlog", "511"),
    ("tcp-keepalive", "300"),
    ("timeout", "0"),
];

pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Emit a map as `key value` lines, keys in lexicographic order.
pub fn render_kv(map: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        out.push_str(key);
        out.push(' ');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Canonical Redis node configuration: defaults merged with overrides.
pub fn render_redis_config(overrides: &BTreeMap<String, String>) -> String {
    let mut merged: BTreeMap<String, String> = DEFAULT_REDIS_CONFIG
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    render_kv(&merged)
}

/// Node configuration for a replica following the given primary endpoint.
pub fn render_replica_config(overrides: &BTreeMap<String, String>, master_host: &str) -> String {
    let mut overrides = overrides.clone();
    overrides.insert(
        "replicaof".to_string(),
        format!("{} {}", master_host, ports::REDIS),
    );
    render_redis_config(&overrides)
}

/// Node configuration for a cluster member. Tuning values win over keys in
/// `additional`; the nodes file lives on the data volume.
pub fn render_cluster_config(tuning: &ClusterTuning) -> String {
    let mut map = tuning.additional.clone();
    map.insert("cluster-enabled".to_string(), "yes".to_string());
    map.insert(
        "cluster-config-file".to_string(),
        "/data/nodes.conf".to_string(),
    );
    map.insert(
        "cluster-node-timeout".to_string(),
        tuning.node_timeout_ms.to_string(),
    );
    map.insert(
        "cluster-require-full-coverage".to_string(),
        if tuning.require_full_coverage { "yes" } else { "no" }.to_string(),
    );
    map.insert(
        "cluster-migration-barrier".to_string(),
        tuning.migration_barrier.to_string(),
    );
    render_redis_config(&map)
}

/// The literal file format the sentinel process expects. The monitor host
/// is the resolved primary address; the sentinel rewrites this file at
/// runtime, which is why it is copied off the read-only mount first.
pub fn render_sentinel_config(tuning: &SentinelTuning, master_name: &str, host: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("port {}\n", ports::SENTINEL));
    out.push_str("bind 0.0.0.0\n");
    out.push_str("sentinel resolve-hostnames yes\n");
    out.push_str(&format!(
        "sentinel monitor {} {} {} {}\n",
        master_name,
        host,
        ports::REDIS,
        tuning.quorum
    ));
    out.push_str(&format!(
        "sentinel down-after-milliseconds {} {}\n",
        master_name, tuning.down_after_milliseconds
    ));
    out.push_str(&format!(
        "sentinel parallel-syncs {} {}\n",
        master_name, tuning.parallel_syncs
    ));
    out.push_str(&format!(
        "sentinel failover-timeout {} {}\n",
        master_name, tuning.failover_timeout
    ));
    out.push_str("sentinel deny-scripts-reconfig yes\n");
    for (key, value) in &tuning.additional {
        out.push_str(&format!("{} {}\n", key, value));
    }
    out
}

/// Hash input for the sentinel workload. Deliberately excludes the
/// resolved primary address: an address change rewrites the config object
/// but must not re-stamp (and thereby rebuild) the sentinel workload.
pub fn sentinel_tuning_digest(tuning: &SentinelTuning, master_name: &str) -> String {
    let mut map = tuning.additional.clone();
    map.insert("master-name".to_string(), master_name.to_string());
    map.insert("quorum".to_string(), tuning.quorum.to_string());
    map.insert(
        "down-after-milliseconds".to_string(),
        tuning.down_after_milliseconds.to_string(),
    );
    map.insert(
        "failover-timeout".to_string(),
        tuning.failover_timeout.to_string(),
    );
    map.insert(
        "parallel-syncs".to_string(),
        tuning.parallel_syncs.to_string(),
    );
    sha256_hex(&render_kv(&map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn render_is_deterministic_and_sorted() {
        let a = render_redis_config(&overrides(&[("zset-max-ziplist-entries", "64"), ("maxmemory", "256mb")]));
        let b = render_redis_config(&overrides(&[("maxmemory", "256mb"), ("zset-max-ziplist-entries", "64")]));
        assert_eq!(a, b);
        let keys: Vec<&str> = a
            .lines()
            .map(|l| l.split_once(' ').unwrap().0)
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert!(a.ends_with('\n'));
    }

    #[test]
    fn user_keys_override_defaults() {
        let rendered = render_redis_config(&overrides(&[("appendonly", "no")]));
        assert!(rendered.contains("appendonly no\n"));
        assert!(!rendered.contains("appendonly yes"));
        // Untouched defaults remain.
        assert!(rendered.contains("dir /data\n"));
        assert!(rendered.contains("port 6379\n"));
    }

    #[test]
    fn identical_inputs_hash_identically() {
        let m = overrides(&[("maxmemory", "128mb")]);
        assert_eq!(
            sha256_hex(&render_redis_config(&m)),
            sha256_hex(&render_redis_config(&m.clone()))
        );
    }

    #[test]
    fn replica_config_points_at_the_primary() {
        let rendered = render_replica_config(&BTreeMap::new(), "cache-master");
        assert!(rendered.contains("replicaof cache-master 6379\n"));
    }

    #[test]
    fn cluster_config_enables_cluster_mode() {
        let tuning = ClusterTuning::default();
        let rendered = render_cluster_config(&tuning);
        assert!(rendered.contains("cluster-enabled yes\n"));
        assert!(rendered.contains("cluster-config-file /data/nodes.conf\n"));
        assert!(rendered.contains("cluster-node-timeout 15000\n"));
        assert!(rendered.contains("cluster-require-full-coverage yes\n"));
        assert!(rendered.contains("cluster-migration-barrier 1\n"));
    }

    #[test]
    fn tuning_wins_over_additional_keys() {
        let mut tuning = ClusterTuning::default();
        tuning
            .additional
            .insert("cluster-node-timeout".to_string(), "1".to_string());
        let rendered = render_cluster_config(&tuning);
        assert!(rendered.contains("cluster-node-timeout 15000\n"));
    }

    #[test]
    fn sentinel_config_has_the_required_lines_in_order() {
        let tuning = SentinelTuning::default();
        let rendered = render_sentinel_config(&tuning, "mymaster", "10.0.0.12");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "port 26379");
        assert_eq!(lines[1], "bind 0.0.0.0");
        assert_eq!(lines[2], "sentinel resolve-hostnames yes");
        assert_eq!(lines[3], "sentinel monitor mymaster 10.0.0.12 6379 2");
        assert_eq!(lines[4], "sentinel down-after-milliseconds mymaster 30000");
        assert_eq!(lines[5], "sentinel parallel-syncs mymaster 1");
        assert_eq!(lines[6], "sentinel failover-timeout mymaster 180000");
        assert_eq!(lines[7], "sentinel deny-scripts-reconfig yes");
    }

    #[test]
    fn sentinel_digest_ignores_the_resolved_address() {
        let tuning = SentinelTuning::default();
        let a = render_sentinel_config(&tuning, "mymaster", "10.0.0.12");
        let b = render_sentinel_config(&tuning, "mymaster", "10.0.0.99");
        assert_ne!(a, b);
        // The workload stamp stays put across address changes.
        assert_eq!(
            sentinel_tuning_digest(&tuning, "mymaster"),
            sentinel_tuning_digest(&tuning, "mymaster")
        );
    }

    #[test]
    fn sentinel_digest_tracks_tuning_changes() {
        let tuning = SentinelTuning::default();
        let mut changed = tuning.clone();
        changed.quorum = 3;
        assert_ne!(
            sentinel_tuning_digest(&tuning, "mymaster"),
            sentinel_tuning_digest(&changed, "mymaster")
        );
    }
}

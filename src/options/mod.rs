//! Desired-state descriptor
//!
//! The host hands every lifecycle call a flat, loosely typed option set
//! ([`DriverOptions`]). [`ClusterSpec::from_options`] is the single
//! parse-and-validate step that turns it into a typed target state; nothing
//! downstream looks at raw option keys.

pub mod flags;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Option keys understood by the driver, with their legacy camelCase aliases
pub mod keys {
    /// Linode personal access token
    pub const ACCESS_TOKEN: &[&str] = &["access-token", "accessToken"];
    /// Internal name of the cluster in the host
    pub const NAME: &[&str] = &["name"];
    /// Remote label
    pub const LABEL: &[&str] = &["label"];
    /// Free-text description
    pub const DESCRIPTION: &[&str] = &["description"];
    /// Region to launch the cluster in
    pub const REGION: &[&str] = &["region"];
    /// Kubernetes version
    pub const KUBERNETES_VERSION: &[&str] = &["kubernetes-version", "kubernetesVersion"];
    /// Cluster tags
    pub const TAGS: &[&str] = &["tags"];
    /// Node pools as `<type>=<count>` entries
    pub const NODE_POOLS: &[&str] = &["node-pools", "nodePools"];
    /// High-availability control plane
    pub const HIGH_AVAILABILITY: &[&str] = &["high-availability", "highAvailability"];
}

/// A string list option value
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StringSlice {
    /// The list entries
    #[serde(default)]
    pub value: Vec<String>,
}

impl From<Vec<String>> for StringSlice {
    fn from(value: Vec<String>) -> Self {
        Self { value }
    }
}

/// Flat key/value options supplied by the host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverOptions {
    /// Boolean options; a present key is an explicit preference
    #[serde(default)]
    pub bool_options: HashMap<String, bool>,
    /// String options
    #[serde(default)]
    pub string_options: HashMap<String, String>,
    /// Integer options
    #[serde(default)]
    pub int_options: HashMap<String, i64>,
    /// String list options
    #[serde(default)]
    pub string_slice_options: HashMap<String, StringSlice>,
}

impl DriverOptions {
    /// First string value found under any of `keys`, or empty
    pub fn string(&self, keys: &[&str]) -> String {
        keys.iter()
            .find_map(|k| self.string_options.get(*k))
            .cloned()
            .unwrap_or_default()
    }

    /// First boolean found under any of `keys`; `None` when unset
    pub fn bool_opt(&self, keys: &[&str]) -> Option<bool> {
        keys.iter().find_map(|k| self.bool_options.get(*k).copied())
    }

    /// First string list found under any of `keys`
    pub fn string_slice(&self, keys: &[&str]) -> Option<&[String]> {
        keys.iter()
            .find_map(|k| self.string_slice_options.get(*k))
            .map(|s| s.value.as_slice())
    }

    /// Builder helper: set a string option
    pub fn with_string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.string_options.insert(key.to_string(), value.into());
        self
    }

    /// Builder helper: set a boolean option
    pub fn with_bool(mut self, key: &str, value: bool) -> Self {
        self.bool_options.insert(key.to_string(), value);
        self
    }

    /// Builder helper: set a string list option
    pub fn with_strings<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let value = values.into_iter().map(Into::into).collect::<Vec<_>>();
        self.string_slice_options
            .insert(key.to_string(), StringSlice::from(value));
        self
    }
}

/// Desired (or recorded) state of one LKE cluster
///
/// Serialized with PascalCase keys so state blobs written by earlier driver
/// releases keep decoding.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterSpec {
    /// Linode personal access token
    #[serde(default)]
    pub access_token: String,
    /// Internal name of the cluster in the host
    #[serde(default)]
    pub name: String,
    /// Remote label
    #[serde(default)]
    pub label: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Region the cluster runs in
    #[serde(default)]
    pub region: String,
    /// Kubernetes version
    #[serde(default, rename = "K8sVersion")]
    pub kubernetes_version: String,
    /// Cluster tags; compared as a set
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Pool type → desired node count
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_pools: BTreeMap<String, u32>,
    /// HA control plane preference; `None` means "no preference"
    #[serde(default)]
    pub high_availability: Option<bool>,
}

impl std::fmt::Debug for ClusterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSpec")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("region", &self.region)
            .field("kubernetes_version", &self.kubernetes_version)
            .field("tags", &self.tags)
            .field("node_pools", &self.node_pools)
            .field("high_availability", &self.high_availability)
            .finish_non_exhaustive()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ClusterSpec {
    /// Parse and validate the host's options
    ///
    /// Missing strings become empty, missing tags an empty list, and a missing
    /// high-availability flag `None`.
    pub fn from_options(opts: &DriverOptions) -> Result<Self, Error> {
        let tags = opts
            .string_slice(keys::TAGS)
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        let node_pools = match opts.string_slice(keys::NODE_POOLS) {
            Some(entries) => parse_node_pools(entries)?,
            None => BTreeMap::new(),
        };

        let spec = Self {
            access_token: opts.string(keys::ACCESS_TOKEN),
            name: opts.string(keys::NAME),
            label: opts.string(keys::LABEL),
            description: opts.string(keys::DESCRIPTION),
            region: opts.string(keys::REGION),
            kubernetes_version: opts.string(keys::KUBERNETES_VERSION),
            tags,
            node_pools,
            high_availability: opts.bool_opt(keys::HIGH_AVAILABILITY),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the node-pool invariant: non-empty, every count at least 1
    pub fn validate(&self) -> Result<(), Error> {
        if self.node_pools.is_empty() {
            return Err(Error::validation("at least one NodePool is required"));
        }
        for (pool_type, count) in &self.node_pools {
            if *count == 0 {
                return Err(Error::validation(format!(
                    "at least 1 node required for NodePool={}",
                    pool_type
                )));
            }
        }
        Ok(())
    }

    /// Sum of desired node counts over all pools
    pub fn node_count(&self) -> u64 {
        self.node_pools.values().map(|c| u64::from(*c)).sum()
    }

    /// Tags as a set, for order-insensitive comparison
    pub fn tag_set(&self) -> BTreeSet<&str> {
        self.tags.iter().map(String::as_str).collect()
    }
}

/// Parse `<pool-type>=<count>` entries; a later entry for a type wins
fn parse_node_pools(entries: &[String]) -> Result<BTreeMap<String, u32>, Error> {
    let mut pools = BTreeMap::new();
    for entry in entries {
        let (pool_type, count) = entry.split_once('=').ok_or_else(|| {
            Error::validation(format!(
                "node pool entry {:?} must have the form <type>=<count>",
                entry
            ))
        })?;
        let pool_type = pool_type.trim();
        if pool_type.is_empty() || count.contains('=') {
            return Err(Error::validation(format!(
                "node pool entry {:?} must have the form <type>=<count>",
                entry
            )));
        }
        let count: i64 = count.trim().parse().map_err(|_| {
            Error::validation(format!(
                "failed to parse node count {} for pool of node type {}",
                count, pool_type
            ))
        })?;
        if count <= 0 {
            return Err(Error::validation(format!(
                "at least 1 node required for NodePool={}",
                pool_type
            )));
        }
        let count = u32::try_from(count).map_err(|_| {
            Error::validation(format!(
                "node count {} for NodePool={} is too large",
                count, pool_type
            ))
        })?;
        pools.insert(pool_type.to_string(), count);
    }
    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> DriverOptions {
        DriverOptions::default()
            .with_string("access-token", "token")
            .with_string("name", "c-abc12")
            .with_string("label", "prod-east")
            .with_string("region", "us-east")
            .with_string("kubernetes-version", "1.31")
            .with_strings("tags", ["rancher", "lke"])
            .with_strings("node-pools", ["g6-standard-1=2", "g6-standard-2=1"])
    }

    #[test]
    fn parses_a_complete_descriptor() {
        let spec = ClusterSpec::from_options(&base_options()).unwrap();
        assert_eq!(spec.access_token, "token");
        assert_eq!(spec.label, "prod-east");
        assert_eq!(spec.kubernetes_version, "1.31");
        assert_eq!(spec.tags, vec!["rancher", "lke"]);
        assert_eq!(spec.node_pools.get("g6-standard-1"), Some(&2));
        assert_eq!(spec.node_pools.get("g6-standard-2"), Some(&1));
        assert_eq!(spec.node_count(), 3);
        assert_eq!(spec.high_availability, None);
    }

    #[test]
    fn accepts_camel_case_aliases() {
        let opts = DriverOptions::default()
            .with_string("accessToken", "t")
            .with_string("kubernetesVersion", "1.30")
            .with_strings("nodePools", ["g6-standard-1=1"])
            .with_bool("highAvailability", false);
        let spec = ClusterSpec::from_options(&opts).unwrap();
        assert_eq!(spec.access_token, "t");
        assert_eq!(spec.kubernetes_version, "1.30");
        assert_eq!(spec.high_availability, Some(false));
    }

    #[test]
    fn high_availability_is_tri_state() {
        let unset = ClusterSpec::from_options(&base_options()).unwrap();
        assert_eq!(unset.high_availability, None);

        let off =
            ClusterSpec::from_options(&base_options().with_bool("high-availability", false))
                .unwrap();
        assert_eq!(off.high_availability, Some(false));

        let on = ClusterSpec::from_options(&base_options().with_bool("high-availability", true))
            .unwrap();
        assert_eq!(on.high_availability, Some(true));
    }

    #[test]
    fn rejects_missing_node_pools() {
        let opts = DriverOptions::default().with_string("access-token", "t");
        let err = ClusterSpec::from_options(&opts).unwrap_err();
        assert!(err.to_string().contains("at least one NodePool"));

        let opts = opts.with_strings("node-pools", Vec::<String>::new());
        assert!(matches!(
            ClusterSpec::from_options(&opts),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn rejects_non_positive_counts() {
        for entry in ["g6-standard-1=0", "g6-standard-1=-3"] {
            let opts = base_options().with_strings("node-pools", [entry]);
            let err = ClusterSpec::from_options(&opts).unwrap_err();
            assert!(
                err.to_string().contains("at least 1 node required"),
                "{entry}: {err}"
            );
        }
    }

    #[test]
    fn rejects_unparsable_entries() {
        for entry in ["g6-standard-1=two", "g6-standard-1", "=2", "a=1=2"] {
            let opts = base_options().with_strings("node-pools", [entry]);
            assert!(
                matches!(ClusterSpec::from_options(&opts), Err(Error::Validation(_))),
                "{entry} should be rejected"
            );
        }
    }

    #[test]
    fn later_entry_for_same_type_wins() {
        let opts = base_options().with_strings("node-pools", ["g6-standard-1=2", "g6-standard-1=4"]);
        let spec = ClusterSpec::from_options(&opts).unwrap();
        assert_eq!(spec.node_pools.len(), 1);
        assert_eq!(spec.node_pools["g6-standard-1"], 4);
    }

    #[test]
    fn tag_set_ignores_order_and_duplicates() {
        let a = ClusterSpec {
            tags: vec!["x".into(), "y".into(), "x".into()],
            ..Default::default()
        };
        let b = ClusterSpec {
            tags: vec!["y".into(), "x".into()],
            ..Default::default()
        };
        assert_eq!(a.tag_set(), b.tag_set());
    }

    #[test]
    fn debug_output_hides_the_access_token() {
        let spec = ClusterSpec::from_options(&base_options()).unwrap();
        let rendered = format!("{:?}", spec);
        assert!(!rendered.contains("token"));
        assert!(rendered.contains("prod-east"));
    }

    #[test]
    fn options_decode_from_host_json() {
        let json = r#"{
            "stringOptions": {"access-token": "t", "region": "us-west"},
            "boolOptions": {"high-availability": true},
            "stringSliceOptions": {"node-pools": {"value": ["g6-standard-1=3"]}}
        }"#;
        let opts: DriverOptions = serde_json::from_str(json).unwrap();
        let spec = ClusterSpec::from_options(&opts).unwrap();
        assert_eq!(spec.region, "us-west");
        assert_eq!(spec.high_availability, Some(true));
        assert_eq!(spec.node_pools["g6-standard-1"], 3);
    }
}

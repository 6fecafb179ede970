//! Option declarations and capability sets advertised to the host

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Value type of a declared option
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FlagType {
    /// Plain string
    String,
    /// List of strings
    StringSlice,
    /// Optional boolean (unset is meaningful)
    BoolPointer,
}

/// Default value of a declared option
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FlagDefault {
    /// Default for a string flag
    String(String),
    /// Default for a string list flag
    StringSlice(Vec<String>),
}

/// Declaration of one option
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Flag {
    /// Value type
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    /// Help text
    pub usage: String,
    /// Default applied by the host when the option is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FlagDefault>,
}

impl Flag {
    fn new(flag_type: FlagType, usage: &str) -> Self {
        Self {
            flag_type,
            usage: usage.to_string(),
            default: None,
        }
    }

    fn with_default(mut self, default: FlagDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// Set of declared options keyed by option name
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DriverFlags {
    /// Declared options
    pub options: BTreeMap<String, Flag>,
}

impl DriverFlags {
    fn flag(mut self, name: &str, flag: Flag) -> Self {
        self.options.insert(name.to_string(), flag);
        self
    }
}

const TAGS_USAGE: &str = "The list of tags applied to the cluster";
const NODE_POOLS_USAGE: &str = "The list of node pools created for the cluster, as <type>=<count>";
const HA_USAGE: &str = "If enabled, this cluster will be a high availability cluster";

/// Options accepted on create
pub fn create_flags() -> DriverFlags {
    DriverFlags::default()
        .flag(
            "access-token",
            Flag::new(FlagType::String, "Linode api access token"),
        )
        .flag(
            "name",
            Flag::new(FlagType::String, "the internal name of the cluster in Rancher"),
        )
        .flag(
            "label",
            Flag::new(FlagType::String, "the label of the cluster in Linode"),
        )
        .flag(
            "description",
            Flag::new(FlagType::String, "An optional description of this cluster"),
        )
        .flag(
            "region",
            Flag::new(FlagType::String, "The region to launch the cluster")
                .with_default(FlagDefault::String("us-central1-a".to_string())),
        )
        .flag("tags", Flag::new(FlagType::StringSlice, TAGS_USAGE))
        .flag(
            "kubernetes-version",
            Flag::new(FlagType::String, "The kubernetes version"),
        )
        .flag("node-pools", Flag::new(FlagType::StringSlice, NODE_POOLS_USAGE))
        .flag("high-availability", Flag::new(FlagType::BoolPointer, HA_USAGE))
}

/// Options accepted on update
pub fn update_flags() -> DriverFlags {
    DriverFlags::default()
        .flag(
            "tags",
            Flag::new(FlagType::StringSlice, TAGS_USAGE)
                .with_default(FlagDefault::StringSlice(Vec::new())),
        )
        .flag("node-pools", Flag::new(FlagType::StringSlice, NODE_POOLS_USAGE))
        .flag("high-availability", Flag::new(FlagType::BoolPointer, HA_USAGE))
}

/// Optional driver operations
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// `get_version` is implemented
    GetVersion,
    /// `set_version` is accepted
    SetVersion,
    /// `get_cluster_size` is implemented
    GetClusterSize,
    /// `set_cluster_size` is implemented
    SetClusterSize,
}

/// Capability set advertised by this driver
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    /// Supported optional operations
    pub capabilities: BTreeSet<Capability>,
}

impl Capabilities {
    /// Whether the capability is advertised
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            capabilities: [
                Capability::GetVersion,
                Capability::SetVersion,
                Capability::GetClusterSize,
                Capability::SetClusterSize,
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// L4 load balancer support of provisioned clusters
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerCapabilities {
    /// Load balancers are available
    pub enabled: bool,
    /// Backing product
    pub provider: String,
    /// Supported protocols
    pub protocols_supported: Vec<String>,
    /// Health checks can be configured
    pub health_check_supported: bool,
}

/// Kubernetes features provisioned clusters offer
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct K8sCapabilities {
    /// L4 load balancer support
    pub l4_load_balancer: LoadBalancerCapabilities,
}

impl Default for K8sCapabilities {
    fn default() -> Self {
        Self {
            l4_load_balancer: LoadBalancerCapabilities {
                enabled: true,
                provider: "NodeBalancer".to_string(),
                protocols_supported: vec!["TCP".to_string(), "UDP".to_string()],
                health_check_supported: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::keys;

    #[test]
    fn create_flags_declare_every_recognized_key() {
        let flags = create_flags();
        for key in [
            keys::ACCESS_TOKEN,
            keys::NAME,
            keys::LABEL,
            keys::DESCRIPTION,
            keys::REGION,
            keys::KUBERNETES_VERSION,
            keys::TAGS,
            keys::NODE_POOLS,
            keys::HIGH_AVAILABILITY,
        ] {
            assert!(flags.options.contains_key(key[0]), "missing {}", key[0]);
        }
        assert_eq!(
            flags.options["region"].default,
            Some(FlagDefault::String("us-central1-a".to_string()))
        );
        assert_eq!(
            flags.options["high-availability"].flag_type,
            FlagType::BoolPointer
        );
    }

    #[test]
    fn update_flags_default_tags_to_empty() {
        let flags = update_flags();
        assert_eq!(flags.options.len(), 3);
        assert_eq!(
            flags.options["tags"].default,
            Some(FlagDefault::StringSlice(vec![]))
        );
        assert!(!flags.options.contains_key("access-token"));
    }

    #[test]
    fn capabilities_cover_version_and_size() {
        let caps = Capabilities::default();
        assert!(caps.has(Capability::GetVersion));
        assert!(caps.has(Capability::SetClusterSize));
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["capabilities"][0], "get-version");
    }
}

/// Shared data model
///
/// Resource entities exchanged between the dispatch layer and the drivers.
/// Every entity serializes with the camelCase property names of the external schema.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

mod serde_bool_string;
mod serde_tri_state;

pub const ROOT_POOL_ID: &str = "ha-root-pool";
pub const ROOT_POOL_NAME: &str = "/";
pub const ROOT_POOL_HOST_NAME: &str = "Resources";
pub const UNKNOWN: &str = "Unknown";

/// Credentials and endpoints of one ESXi host.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub host: String,
    pub ssh_port: u16,
    pub ssl_port: u16,
    pub username: String,
    pub password: String,
    pub ovf_tool_location: String,
}

impl ConnectionInfo {
    pub fn ssh_address(&self) -> String {
        format!("{}:{}", self.host, self.ssh_port)
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("ssh_port", &self.ssh_port)
            .field("ssl_port", &self.ssl_port)
            .field("username", &self.username)
            .field("password", &"******")
            .field("ovf_tool_location", &self.ovf_tool_location)
            .finish()
    }
}

/// Virtual machine power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    #[serde(rename = "on")]
    On,
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Suspended => "suspended",
            Self::Unknown => UNKNOWN,
        }
    }

    /// Running or paused guests must be stopped before their configuration is edited.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::On | Self::Suspended)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "suspended" => Ok(Self::Suspended),
            "Unknown" | "unknown" => Ok(Self::Unknown),
            other => Err(Error::InvalidArgument(format!(
                "power must be on, off or suspended, got '{}'",
                other
            ))),
        }
    }
}

/// Virtual disk provisioning type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DiskType {
    #[default]
    #[serde(rename = "thin")]
    Thin,
    #[serde(rename = "zeroedthick")]
    ZeroedThick,
    #[serde(rename = "eagerzeroedthick")]
    EagerZeroedThick,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl DiskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thin => "thin",
            Self::ZeroedThick => "zeroedthick",
            Self::EagerZeroedThick => "eagerzeroedthick",
            Self::Unknown => UNKNOWN,
        }
    }

    /// Name understood by ovftool's `-dm` flag.
    pub fn ovftool_mode(&self) -> &'static str {
        match self {
            Self::ZeroedThick => "thick",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thin" => Ok(Self::Thin),
            "zeroedthick" => Ok(Self::ZeroedThick),
            "eagerzeroedthick" => Ok(Self::EagerZeroedThick),
            other => Err(Error::InvalidArgument(format!(
                "disk type must be thin, zeroedthick or eagerzeroedthick, got '{}'",
                other
            ))),
        }
    }
}

/// Resource pool shares: a keyword level or a custom integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shares {
    Low,
    #[default]
    Normal,
    High,
    Custom(u32),
}

impl fmt::Display for Shares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Normal => f.write_str("normal"),
            Self::High => f.write_str("high"),
            Self::Custom(value) => write!(f, "{}", value),
        }
    }
}

impl FromStr for Shares {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => other.parse::<u32>().map(Self::Custom).map_err(|e| {
                Error::InvalidArgument(format!(
                    "shares must be low/normal/high/<custom>, got '{}' ({})",
                    s, e
                ))
            }),
        }
    }
}

impl Serialize for Shares {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Shares {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a new virtual machine comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VmSource {
    /// Built from the plain vmx template.
    #[default]
    None,
    /// `vi://` URI of an existing guest on the same host.
    Clone(String),
    /// HTTP(S) URL of an OVF/OVA package.
    Remote(String),
    /// OVF/OVA package on the machine running the provider.
    Local(String),
}

impl VmSource {
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Clone(uri) | Self::Remote(uri) | Self::Local(uri) => Some(uri),
        }
    }

    /// OVF/OVA packages accept network mapping and property injection, clones do not.
    pub fn is_ovf_package(&self) -> bool {
        self.location()
            .map(|location| location.ends_with(".ova") || location.ends_with(".ovf"))
            .unwrap_or(false)
    }
}

impl fmt::Display for VmSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Clone(uri) | Self::Remote(uri) => f.write_str(uri),
            Self::Local(path) => write!(f, "local://{}", path),
        }
    }
}

impl FromStr for VmSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.is_empty() || s == "none" {
            Self::None
        } else if s.starts_with("vi://") {
            Self::Clone(s.to_string())
        } else if s.starts_with("http://") || s.starts_with("https://") {
            Self::Remote(s.to_string())
        } else {
            Self::Local(s.trim_start_matches("local://").to_string())
        })
    }
}

impl Serialize for VmSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VmSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

impl KeyValuePair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub mac_address: String,
    pub nic_type: String,
    pub virtual_network: String,
}

/// A data disk attached to a SCSI slot, e.g. `0:1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VmVirtualDisk {
    pub slot: String,
    pub virtual_disk_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Uplink {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSwitch {
    pub id: String,
    pub name: String,
    pub ports: u32,
    pub mtu: u32,
    pub link_discovery_mode: String,
    pub promiscuous_mode: bool,
    pub mac_changes: bool,
    pub forged_transmits: bool,
    pub uplinks: Vec<Uplink>,
}

impl Default for VirtualSwitch {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            ports: 128,
            mtu: 1500,
            link_discovery_mode: "listen".to_string(),
            promiscuous_mode: false,
            mac_changes: false,
            forged_transmits: false,
            uplinks: Vec::new(),
        }
    }
}

/// Port group; `None` security fields inherit the vswitch policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortGroup {
    pub id: String,
    pub name: String,
    #[serde(rename = "vSwitch")]
    pub v_switch: String,
    pub vlan: u32,
    #[serde(with = "serde_tri_state")]
    pub promiscuous_mode: Option<bool>,
    #[serde(with = "serde_tri_state")]
    pub mac_changes: Option<bool>,
    #[serde(with = "serde_tri_state")]
    pub forged_transmits: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePool {
    pub id: String,
    pub name: String,
    pub cpu_min: u32,
    #[serde(with = "serde_bool_string")]
    pub cpu_min_expandable: bool,
    pub cpu_max: u32,
    pub cpu_shares: Shares,
    pub mem_min: u32,
    #[serde(with = "serde_bool_string")]
    pub mem_min_expandable: bool,
    pub mem_max: u32,
    pub mem_shares: Shares,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            cpu_min: 100,
            cpu_min_expandable: true,
            cpu_max: 0,
            cpu_shares: Shares::Normal,
            mem_min: 200,
            mem_min_expandable: true,
            mem_max: 0,
            mem_shares: Shares::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDisk {
    pub id: String,
    pub name: String,
    pub disk_store: String,
    pub directory: String,
    pub disk_type: DiskType,
    /// Size in GB.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub disk_store: String,
    pub resource_pool_name: String,
    pub boot_firmware: String,
    pub boot_disk_size: u64,
    pub boot_disk_type: DiskType,
    pub mem_size: u64,
    pub num_v_cpus: u32,
    #[serde(rename = "virtualHWVer")]
    pub virtual_hw_ver: u32,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerState>,
    pub ip_address: String,
    pub network_interfaces: Vec<NetworkInterface>,
    pub virtual_disks: Vec<VmVirtualDisk>,
    pub ovf_properties: Vec<KeyValuePair>,
    pub ovf_properties_timer: u32,
    pub info: Vec<KeyValuePair>,
    pub notes: String,
    #[serde(rename = "sourcePath")]
    pub source: VmSource,
    pub startup_timeout: u32,
    pub shutdown_timeout: u32,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            disk_store: String::new(),
            resource_pool_name: ROOT_POOL_NAME.to_string(),
            boot_firmware: String::new(),
            boot_disk_size: 16,
            boot_disk_type: DiskType::Thin,
            mem_size: 512,
            num_v_cpus: 1,
            virtual_hw_ver: 13,
            os: "centos".to_string(),
            power: None,
            ip_address: String::new(),
            network_interfaces: Vec::new(),
            virtual_disks: Vec::new(),
            ovf_properties: Vec::new(),
            ovf_properties_timer: 90,
            info: Vec::new(),
            notes: String::new(),
            source: VmSource::None,
            startup_timeout: 120,
            shutdown_timeout: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shares_parse() {
        assert_eq!("LOW".parse::<Shares>().unwrap(), Shares::Low);
        assert_eq!("4000".parse::<Shares>().unwrap(), Shares::Custom(4000));
        assert!("plenty".parse::<Shares>().is_err());
        assert_eq!(Shares::Custom(250).to_string(), "250");
    }

    #[test]
    fn test_vm_source_parse() {
        assert_eq!("none".parse::<VmSource>().unwrap(), VmSource::None);
        assert!(matches!(
            "https://example.org/alpine.ova".parse::<VmSource>().unwrap(),
            VmSource::Remote(_)
        ));
        assert_eq!(
            "local:///tmp/a.ovf".parse::<VmSource>().unwrap(),
            VmSource::Local("/tmp/a.ovf".into())
        );
        assert!(VmSource::Local("/tmp/a.ovf".into()).is_ovf_package());
        assert!(!VmSource::Clone("vi://root@h/vm".into()).is_ovf_package());
    }

    #[test]
    fn test_disk_type_ovftool_mode() {
        assert_eq!(DiskType::ZeroedThick.ovftool_mode(), "thick");
        assert_eq!(DiskType::Thin.ovftool_mode(), "thin");
        assert!("thick".parse::<DiskType>().is_err());
    }

    #[test]
    fn test_port_group_serializes_tri_state() {
        let pg = PortGroup {
            id: "vSwitch0/pg".into(),
            name: "pg".into(),
            v_switch: "vSwitch0".into(),
            vlan: 10,
            promiscuous_mode: Some(true),
            mac_changes: None,
            forged_transmits: Some(false),
        };
        let value = serde_json::to_value(&pg).unwrap();
        assert_eq!(value["vSwitch"], "vSwitch0");
        assert_eq!(value["promiscuousMode"], "true");
        assert_eq!(value["macChanges"], "");
        assert_eq!(value["forgedTransmits"], "false");
    }

    #[test]
    fn test_connection_info_debug_masks_password() {
        let info = ConnectionInfo {
            host: "esxi".into(),
            ssh_port: 22,
            ssl_port: 443,
            username: "root".into(),
            password: "s3cret".into(),
            ovf_tool_location: "ovftool".into(),
        };
        assert!(!format!("{:?}", info).contains("s3cret"));
    }
}

/// Scrapers for the tabular and `key: value` output of esxcli and vim-cmd.
///
/// A pattern that does not match yields the documented default, never an error.

use common::models::{ResourcePool, Shares};
use once_cell::sync::Lazy;
use regex::Regex;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("static regex"));
    };
}

pattern!(CONFIGURED_PORTS, r"Configured Ports: ([0-9]*)");
pattern!(MTU, r"MTU: ([0-9]*)");
pattern!(CDP_STATUS, r"CDP Status: ([a-z]*)");
pattern!(UPLINKS, r"Uplinks: (.*)");
pattern!(ALLOW_PROMISCUOUS, r"Allow Promiscuous: (.*)");
pattern!(ALLOW_MAC_CHANGE, r"Allow MAC Address Change: (.*)");
pattern!(ALLOW_FORGED, r"Allow Forged Transmits: (.*)");
pattern!(PG_VSWITCH, r"( {2}.* {2})  +[0-9]+  +[0-9]+$");
pattern!(PG_VLAN, r"  +([0-9]+)$");
pattern!(QUOTED, r#"".*""#);
pattern!(BRACKETED, r"\[.*]");
pattern!(DIGITS, r"[0-9]+");
pattern!(SIGNED_DIGITS, r"-?[0-9]+");
pattern!(EXPANDABLE, r"(true|false)");
pattern!(LEVEL, r"(low|high|normal)");

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Fields of `esxcli network vswitch standard list -v <name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchListing {
    pub ports: u32,
    pub mtu: u32,
    pub link_discovery_mode: String,
    pub uplinks: Vec<String>,
}

pub fn parse_switch_listing(text: &str) -> SwitchListing {
    SwitchListing {
        ports: capture(&CONFIGURED_PORTS, text)
            .and_then(|v| v.parse().ok())
            .unwrap_or(128),
        mtu: capture(&MTU, text)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1500),
        link_discovery_mode: capture(&CDP_STATUS, text)
            .filter(|v| !v.is_empty())
            .unwrap_or("listen")
            .to_string(),
        uplinks: parse_uplinks(text),
    }
}

/// `Uplinks: vmnic0, vmnic1` -> `["vmnic0", "vmnic1"]`
pub fn parse_uplinks(text: &str) -> Vec<String> {
    capture(&UPLINKS, text)
        .map(|raw| {
            raw.split_whitespace()
                .map(|s| s.replace(',', ""))
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchSecurity {
    pub promiscuous_mode: bool,
    pub mac_changes: bool,
    pub forged_transmits: bool,
}

/// Fields of `esxcli network vswitch standard policy security get -v <name>`.
pub fn parse_switch_security(text: &str) -> SwitchSecurity {
    let flag = |re: &Regex| {
        capture(re, text)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false)
    };
    SwitchSecurity {
        promiscuous_mode: flag(&ALLOW_PROMISCUOUS),
        mac_changes: flag(&ALLOW_MAC_CHANGE),
        forged_transmits: flag(&ALLOW_FORGED),
    }
}

/// Virtual switch and VLAN id from one line of `esxcli network vswitch standard portgroup list`.
pub fn parse_port_group_line(line: &str) -> (String, u32) {
    let v_switch = capture(&PG_VSWITCH, line).unwrap_or_default().to_string();
    let vlan = capture(&PG_VLAN, line)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    (v_switch, vlan)
}

/// Overlay the output of `vim-cmd hostsvc/rsrc/pool_config_get` onto `pool`.
///
/// Fields start in the cpu section and switch to memory after `memoryAllocation`.
pub fn apply_pool_config(text: &str, pool: &mut ResourcePool) {
    let mut cpu = true;

    for line in text.lines() {
        if line.contains("memoryAllocation = ") {
            cpu = false;
        } else if line.contains("reservation = ") {
            let value = DIGITS
                .find(line)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            if cpu {
                pool.cpu_min = value;
            } else {
                pool.mem_min = value;
            }
        } else if line.contains("expandableReservation = ") {
            let Some(value) = EXPANDABLE.find(line).map(|m| m.as_str() == "true") else {
                continue;
            };
            if cpu {
                pool.cpu_min_expandable = value;
            } else {
                pool.mem_min_expandable = value;
            }
        } else if line.contains("limit = ") {
            // -1 means unlimited
            let value = SIGNED_DIGITS
                .find(line)
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .unwrap_or(0)
                .clamp(0, u32::MAX as i64) as u32;
            if cpu {
                pool.cpu_max = value;
            } else {
                pool.mem_max = value;
            }
        } else if line.contains("shares = ") {
            let Some(value) = DIGITS.find(line).and_then(|m| m.as_str().parse().ok()) else {
                continue;
            };
            if cpu {
                pool.cpu_shares = Shares::Custom(value);
            } else {
                pool.mem_shares = Shares::Custom(value);
            }
        } else if line.contains("level = ") {
            let Some(level) = LEVEL.find(line).and_then(|m| m.as_str().parse().ok()) else {
                continue;
            };
            if cpu {
                pool.cpu_shares = level;
            } else {
                pool.mem_shares = level;
            }
        }
    }
}

/// Display name and datastore from `vim-cmd vmsvc/get.summary <id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmSummary {
    pub name: String,
    pub disk_store: String,
}

pub fn parse_vm_summary(text: &str) -> VmSummary {
    let mut summary = VmSummary::default();
    for line in text.lines() {
        if line.contains("name = ") {
            if let Some(m) = QUOTED.find(line) {
                summary.name = m.as_str().replace('"', "");
            }
        } else if line.contains("vmPathName = ") {
            if let Some(m) = BRACKETED.find(line) {
                summary.disk_store = m.as_str().replace(['[', ']'], "");
            }
        }
    }
    summary
}

/// `uptimeSeconds` value; `None` when the output is not a number.
pub fn parse_uptime(text: &str) -> Option<u64> {
    text.trim().parse().ok()
}

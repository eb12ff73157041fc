/// Input validation run before any host is contacted
///
/// Failures are keyed `"{token}.{property}"`; array items use `{property}[{i}]{field}`.

use common::utils::validate_mac_address;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::dispatch::ResourceKind;
use crate::properties::{Inputs, Properties};

const MAX_UPLINKS: usize = 32;
const MAX_TIMEOUT: f64 = 600.0;
const MAX_OVF_PROPERTIES_TIMER: f64 = 6000.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    pub property: String,
    pub reason: String,
}

#[derive(Default)]
struct Failures(BTreeMap<String, String>);

impl Failures {
    fn required(&mut self, property: &str) {
        self.0.insert(
            property.to_string(),
            format!("The properly '{}' is required!", property),
        );
    }

    fn invalid(&mut self, property: &str, reason: &str) {
        self.0.insert(
            property.to_string(),
            format!("The properly '{}' is invalid! The value {}", property, reason),
        );
    }

    fn require_all(&mut self, inputs: &Inputs, properties: &[&str]) {
        for property in properties {
            if !inputs.contains_key(*property) {
                self.required(property);
            }
        }
    }

    fn require_item_fields(&mut self, inputs: &Inputs, property: &str, fields: &[&str]) {
        let Some(Value::Array(items)) = inputs.get(property) else {
            return;
        };
        for (i, item) in items.iter().enumerate() {
            for field in fields {
                let present = item.as_object().is_some_and(|o| o.contains_key(*field));
                if !present {
                    self.required(&format!("{}[{}]{}", property, i, field));
                }
            }
        }
    }

    fn into_check_failures(self, kind: ResourceKind) -> Vec<CheckFailure> {
        let token = kind.token();
        self.0
            .into_iter()
            .map(|(property, reason)| CheckFailure {
                property: format!("{}.{}", token, property),
                reason,
            })
            .collect()
    }
}

/// String form of a scalar input, as the engine would print it.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Validate `inputs` for `kind`. An empty result means the inputs are acceptable.
pub fn check(kind: ResourceKind, inputs: &Inputs) -> Vec<CheckFailure> {
    let mut failures = Failures::default();
    match kind {
        ResourceKind::PortGroup => check_port_group(inputs, &mut failures),
        ResourceKind::ResourcePool => check_resource_pool(inputs, &mut failures),
        ResourceKind::VirtualDisk => check_virtual_disk(inputs, &mut failures),
        ResourceKind::VirtualMachine => check_virtual_machine(inputs, &mut failures),
        ResourceKind::VirtualSwitch => check_virtual_switch(inputs, &mut failures),
    }
    failures.into_check_failures(kind)
}

fn check_port_group(inputs: &Inputs, failures: &mut Failures) {
    failures.require_all(inputs, &["name", "vSwitch", "vlan"]);

    for key in ["forgedTransmits", "promiscuousMode", "macChanges"] {
        if let Some(value) = inputs.get(key) {
            if !matches!(text(value).as_str(), "true" | "false" | "") {
                failures.invalid(key, "must be true, false or empty to inherit");
            }
        }
    }
}

fn check_resource_pool(inputs: &Inputs, failures: &mut Failures) {
    match inputs.get("name").map(text) {
        None => failures.required("name"),
        Some(name) if name == "/" => failures.required("name"),
        Some(name) if name.starts_with('/') => {
            failures
                .0
                .insert("name".into(), "The properly 'name' cannot start with '/'!".into());
        }
        Some(_) => {}
    }

    for key in ["cpuMinExpandable", "memMinExpandable"] {
        if let Some(value) = inputs.get(key) {
            if !matches!(text(value).as_str(), "true" | "false") {
                failures.invalid(key, "must be true or false");
            }
        }
    }

    for key in ["cpuShares", "memShares"] {
        if let Some(value) = inputs.get(key) {
            let value = text(value);
            if matches!(value.as_str(), "low" | "normal" | "high") {
                continue;
            }
            if let Err(e) = value.parse::<u32>() {
                failures.invalid(key, &format!("must be low/normal/high/<custom> ({})", e));
            }
        }
    }
}

fn check_virtual_disk(inputs: &Inputs, failures: &mut Failures) {
    failures.require_all(inputs, &["name", "diskStore", "directory", "diskType"]);

    if let Some(value) = inputs.get("diskType") {
        if !matches!(text(value).as_str(), "thin" | "zeroedthick" | "eagerzeroedthick") {
            failures.invalid("diskType", "must be thin, zeroedthick or eagerzeroedthick");
        }
    }
}

fn check_virtual_machine(inputs: &Inputs, failures: &mut Failures) {
    let props = Properties::new(inputs);

    for (key, max) in [
        ("shutdownTimeout", MAX_TIMEOUT),
        ("startupTimeout", MAX_TIMEOUT),
        ("ovfPropertiesTimer", MAX_OVF_PROPERTIES_TIMER),
    ] {
        let Some(value) = props.value(key) else {
            continue;
        };
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if !matches!(number, Some(n) if (0.0..=max).contains(&n)) {
            failures.invalid(key, &format!("should be in between 0 and {}", max));
        }
    }

    failures.require_item_fields(inputs, "ovfProperties", &["key", "value"]);
    failures.require_item_fields(inputs, "info", &["key", "value"]);
    failures.require_item_fields(inputs, "virtualDisks", &["virtualDiskId"]);

    for (i, nic) in props.objects("networkInterfaces").iter().enumerate() {
        if let Some(mac) = nic.string("macAddress").filter(|m| !m.is_empty()) {
            if !validate_mac_address(&mac) {
                failures.invalid(
                    &format!("networkInterfaces[{}]macAddress", i),
                    &format!("'{}' is not a valid MAC address", mac),
                );
            }
        }
    }

    failures.require_all(
        inputs,
        &["name", "diskStore", "resourcePoolName", "memSize", "numVCpus", "os"],
    );
}

fn check_virtual_switch(inputs: &Inputs, failures: &mut Failures) {
    failures.require_all(inputs, &["name"]);

    if let Some(value) = inputs.get("linkDiscoveryMode") {
        if !matches!(text(value).as_str(), "down" | "listen" | "advertise" | "both") {
            failures.invalid("linkDiscoveryMode", "must be one of down, listen, advertise or both");
        }
    }

    for key in ["upLinks", "uplinks"] {
        let Some(Value::Array(uplinks)) = inputs.get(key) else {
            continue;
        };
        if uplinks.len() > MAX_UPLINKS {
            failures.invalid(
                key,
                &format!("must contain max {} up links, currently '{}'", MAX_UPLINKS, uplinks.len()),
            );
        }
        failures.require_item_fields(inputs, key, &["name"]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn inputs(value: Value) -> Inputs {
        value.as_object().cloned().unwrap()
    }

    fn properties(failures: &[CheckFailure]) -> Vec<&str> {
        failures.iter().map(|f| f.property.as_str()).collect()
    }

    #[test]
    fn test_port_group_requirements() {
        let failures = check(ResourceKind::PortGroup, &inputs(json!({ "macChanges": "maybe" })));
        assert_eq!(
            properties(&failures),
            vec![
                "esxi-native:index:PortGroup.macChanges",
                "esxi-native:index:PortGroup.name",
                "esxi-native:index:PortGroup.vSwitch",
                "esxi-native:index:PortGroup.vlan",
            ]
        );
        assert_eq!(
            failures[0].reason,
            "The properly 'macChanges' is invalid! The value must be true, false or empty to inherit"
        );
    }

    #[test]
    fn test_port_group_inherit_is_valid() {
        let failures = check(
            ResourceKind::PortGroup,
            &inputs(json!({
                "name": "pg", "vSwitch": "vs", "vlan": 0,
                "promiscuousMode": "", "forgedTransmits": true, "macChanges": "false"
            })),
        );
        assert!(failures.is_empty(), "{:?}", failures);
    }

    #[test]
    fn test_resource_pool_name_rules() {
        let root = check(ResourceKind::ResourcePool, &inputs(json!({ "name": "/" })));
        assert_eq!(root[0].reason, "The properly 'name' is required!");

        let leading = check(ResourceKind::ResourcePool, &inputs(json!({ "name": "/dev" })));
        assert_eq!(leading[0].reason, "The properly 'name' cannot start with '/'!");

        assert!(check(ResourceKind::ResourcePool, &inputs(json!({ "name": "dev/web" }))).is_empty());
    }

    #[test]
    fn test_resource_pool_shares_and_expandables() {
        let failures = check(
            ResourceKind::ResourcePool,
            &inputs(json!({
                "name": "dev",
                "cpuShares": "4000",
                "memShares": "lots",
                "cpuMinExpandable": "yes",
                "memMinExpandable": false
            })),
        );
        assert_eq!(
            properties(&failures),
            vec![
                "esxi-native:index:ResourcePool.cpuMinExpandable",
                "esxi-native:index:ResourcePool.memShares",
            ]
        );
        assert!(failures[1].reason.contains("must be low/normal/high/<custom>"));
    }

    #[test]
    fn test_virtual_disk_type() {
        let failures = check(
            ResourceKind::VirtualDisk,
            &inputs(json!({ "name": "d", "diskStore": "ds", "directory": "x", "diskType": "sparse" })),
        );
        assert_eq!(properties(&failures), vec!["esxi-native:index:VirtualDisk.diskType"]);
    }

    #[test]
    fn test_virtual_machine_ranges_and_items() {
        let failures = check(
            ResourceKind::VirtualMachine,
            &inputs(json!({
                "name": "web-01", "diskStore": "ds", "resourcePoolName": "/",
                "memSize": 512, "numVCpus": 1, "os": "centos",
                "startupTimeout": 120,
                "shutdownTimeout": 601,
                "ovfPropertiesTimer": 6000,
                "ovfProperties": [{ "key": "hostname" }],
                "virtualDisks": [{ "slot": "0:1" }],
                "networkInterfaces": [{ "macAddress": "00:50:56:zz:00:01" }, { "virtualNetwork": "VM Network" }]
            })),
        );
        assert_eq!(
            properties(&failures),
            vec![
                "esxi-native:index:VirtualMachine.networkInterfaces[0]macAddress",
                "esxi-native:index:VirtualMachine.ovfProperties[0]value",
                "esxi-native:index:VirtualMachine.shutdownTimeout",
                "esxi-native:index:VirtualMachine.virtualDisks[0]virtualDiskId",
            ]
        );
    }

    #[test]
    fn test_virtual_machine_required() {
        let failures = check(ResourceKind::VirtualMachine, &Inputs::new());
        assert_eq!(failures.len(), 6);
    }

    #[test]
    fn test_virtual_switch_uplinks() {
        let uplinks: Vec<Value> = (0..33).map(|i| json!({ "name": format!("vmnic{}", i) })).collect();
        let failures = check(
            ResourceKind::VirtualSwitch,
            &inputs(json!({ "name": "vs", "linkDiscoveryMode": "shout", "upLinks": uplinks })),
        );
        assert_eq!(
            properties(&failures),
            vec![
                "esxi-native:index:VirtualSwitch.linkDiscoveryMode",
                "esxi-native:index:VirtualSwitch.upLinks",
            ]
        );
        assert!(failures[1].reason.contains("must contain max 32 up links, currently '33'"));

        let unnamed = check(ResourceKind::VirtualSwitch, &inputs(json!({ "name": "vs", "upLinks": [{}] })));
        assert_eq!(properties(&unnamed), vec!["esxi-native:index:VirtualSwitch.upLinks[0]name"]);
    }
}

/// Entity to flat property map
///
/// Outputs handed back to the engine are flat JSON objects keyed by the
/// camelCase property names. Empty collections are omitted.

use common::models::{PortGroup, ResourcePool, VirtualDisk, VirtualMachine, VirtualSwitch};
use common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};

pub type PropertyMap = Map<String, Value>;

pub trait Project {
    /// Flat property map of `self`; the id is kept only when `keep_id` is set.
    fn project(&self, keep_id: bool) -> Result<PropertyMap>;
}

fn flatten<T: Serialize>(entity: &T, keep_id: bool) -> Result<PropertyMap> {
    match serde_json::to_value(entity)? {
        Value::Object(mut map) => {
            if !keep_id {
                map.remove("id");
            }
            Ok(map)
        }
        other => Err(Error::Internal(format!(
            "expected an object to project, got {}",
            other
        ))),
    }
}

fn drop_if_empty(map: &mut PropertyMap, key: &str) {
    let empty = match map.get(key) {
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Null) => true,
        _ => false,
    };
    if empty {
        map.remove(key);
    }
}

impl Project for VirtualSwitch {
    fn project(&self, keep_id: bool) -> Result<PropertyMap> {
        let mut map = flatten(self, keep_id)?;
        drop_if_empty(&mut map, "uplinks");
        Ok(map)
    }
}

impl Project for PortGroup {
    fn project(&self, keep_id: bool) -> Result<PropertyMap> {
        flatten(self, keep_id)
    }
}

impl Project for ResourcePool {
    fn project(&self, keep_id: bool) -> Result<PropertyMap> {
        flatten(self, keep_id)
    }
}

impl Project for VirtualDisk {
    fn project(&self, keep_id: bool) -> Result<PropertyMap> {
        flatten(self, keep_id)
    }
}

impl Project for VirtualMachine {
    fn project(&self, keep_id: bool) -> Result<PropertyMap> {
        let mut map = flatten(self, keep_id)?;

        // Inputs only; never observable on the host.
        for key in ["sourcePath", "ovfProperties", "ovfPropertiesTimer"] {
            map.remove(key);
        }

        if matches!(map.get("bootDiskType").and_then(Value::as_str), Some("Unknown" | "")) {
            map.remove("bootDiskType");
        }
        for key in ["info", "networkInterfaces", "virtualDisks"] {
            drop_if_empty(&mut map, key);
        }
        Ok(map)
    }
}

/// Virtual machine view of the vmx file
///
/// Maps the generic [`Vmx`] key/value list to virtual machine settings: the
/// template for a blank guest, the observed snapshot used by Read, and the
/// diff-based rewrite used by Create and Update.

use common::models::{KeyValuePair, NetworkInterface, VirtualMachine, VmVirtualDisk};
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use crate::parsers::vmx::{decode_notes, encode_notes, Vmx};

pub const NIC_SLOTS: usize = 10;
const SCSI_BUSES: u8 = 4;
const SCSI_UNITS: u8 = 16;
const SCSI_CONTROLLER_UNIT: u8 = 7;
const DEFAULT_NIC_TYPE: &str = "e1000";
const GUESTINFO_PREFIX: &str = "guestinfo.";

static SCSI_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^scsi([0-3]):([0-9]{1,2})\.(.+)$").expect("static regex"));
static ETHERNET_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ethernet([0-9])\.(.+)$").expect("static regex"));

/// Blank guest definition used when a VM is built without a source image.
pub fn plain_vmx(vm: &VirtualMachine) -> Vmx {
    let mut vmx = Vmx::default();
    let entries = [
        ("config.version", "8".to_string()),
        ("virtualHW.version", vm.virtual_hw_ver.to_string()),
        ("displayName", vm.name.clone()),
        ("numvcpus", vm.num_v_cpus.to_string()),
        ("memSize", vm.mem_size.to_string()),
        ("guestOS", vm.os.clone()),
        ("annotation", encode_notes(&vm.notes)),
        ("floppy0.present", "FALSE".to_string()),
        ("scsi0.present", "TRUE".to_string()),
        ("scsi0.sharedBus", "none".to_string()),
        ("scsi0.virtualDev", "lsilogic".to_string()),
        ("disk.EnableUUID", "TRUE".to_string()),
        ("pciBridge0.present", "TRUE".to_string()),
    ];
    for (key, value) in entries {
        vmx.set(key, value);
    }
    for bridge in 4..=7 {
        vmx.set(&format!("pciBridge{}.present", bridge), "TRUE");
        vmx.set(&format!("pciBridge{}.virtualDev", bridge), "pcieRootPort");
        vmx.set(&format!("pciBridge{}.functions", bridge), "8");
    }
    vmx.set("scsi0:0.present", "TRUE");
    vmx.set("scsi0:0.fileName", format!("{}.vmdk", vm.name));
    vmx.set("scsi0:0.deviceType", "scsi-hardDisk");
    vmx.set("nvram", format!("{}.nvram", vm.name));
    if matches!(vm.boot_firmware.as_str(), "efi" | "bios") {
        vmx.set("firmware", vm.boot_firmware.clone());
    }
    vmx.set("ide1:0.present", "TRUE");
    vmx.set("ide1:0.fileName", "");
    vmx.set("ide1:0.deviceType", "cdrom-raw");
    vmx
}

/// Settings observed in a vmx file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmxSnapshot {
    pub mem_size: Option<u64>,
    pub num_v_cpus: Option<u32>,
    pub virtual_hw_ver: Option<u32>,
    pub os: Option<String>,
    pub boot_firmware: Option<String>,
    pub notes: String,
    pub virtual_disks: Vec<VmVirtualDisk>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub info: Vec<KeyValuePair>,
}

#[derive(Default)]
struct NicSlot {
    network: String,
    address: String,
    generated: bool,
    virtual_dev: String,
}

pub fn snapshot(vmx: &Vmx) -> VmxSnapshot {
    let mut snapshot = VmxSnapshot::default();
    let mut disks = BTreeMap::new();
    let mut nics: BTreeMap<usize, NicSlot> = BTreeMap::new();

    for (key, value) in vmx.iter() {
        match key {
            "memSize" => snapshot.mem_size = value.parse().ok(),
            "numvcpus" => snapshot.num_v_cpus = value.parse().ok(),
            "virtualHW.version" => snapshot.virtual_hw_ver = value.parse().ok(),
            "guestOS" => snapshot.os = Some(value.to_string()),
            "firmware" => snapshot.boot_firmware = Some(value.to_string()),
            "annotation" => snapshot.notes = decode_notes(value),
            _ if key.starts_with("numa.autosize.vcpu.") => {
                snapshot.num_v_cpus = value.parse().ok()
            }
            _ if key.starts_with(GUESTINFO_PREFIX) => snapshot.info.push(KeyValuePair::new(
                &key[GUESTINFO_PREFIX.len()..],
                value,
            )),
            _ => {
                if let Some(caps) = SCSI_KEY.captures(key) {
                    let (bus, unit) = (&caps[1], &caps[2]);
                    if &caps[3] == "fileName" && !(bus == "0" && unit == "0") {
                        let slot: (u8, u8) = (
                            bus.parse().unwrap_or_default(),
                            unit.parse().unwrap_or_default(),
                        );
                        disks.insert(slot, value.to_string());
                    }
                } else if let Some(caps) = ETHERNET_KEY.captures(key) {
                    let index: usize = caps[1].parse().unwrap_or_default();
                    let nic = nics.entry(index).or_default();
                    match &caps[2] {
                        "networkName" => nic.network = value.to_string(),
                        "addressType" => nic.generated = value == "generated",
                        "address" => nic.address = value.to_string(),
                        "virtualDev" => nic.virtual_dev = value.to_string(),
                        _ => {}
                    }
                }
            }
        }
    }

    snapshot.virtual_disks = disks
        .into_iter()
        .map(|((bus, unit), file)| VmVirtualDisk {
            slot: format!("{}:{}", bus, unit),
            virtual_disk_id: file,
        })
        .collect();
    snapshot.network_interfaces = nics
        .into_iter()
        .filter(|(index, nic)| *index < NIC_SLOTS && !nic.network.is_empty())
        .map(|(_, nic)| NetworkInterface {
            mac_address: if nic.generated { String::new() } else { nic.address },
            nic_type: nic.virtual_dev,
            virtual_network: nic.network,
        })
        .collect();

    snapshot
}

/// Every data disk position, boot slot and controller unit excluded.
fn data_slots() -> impl Iterator<Item = (u8, u8)> {
    (0..SCSI_BUSES)
        .flat_map(|bus| (0..SCSI_UNITS).map(move |unit| (bus, unit)))
        .filter(|&(bus, unit)| !(bus == 0 && unit == 0) && unit != SCSI_CONTROLLER_UNIT)
}

fn parse_slot(slot: &str) -> Result<(u8, u8)> {
    let invalid = || {
        Error::InvalidArgument(format!(
            "virtual disk slot '{}' is invalid, expected <0-3>:<0-15> other than 0:0 and unit 7",
            slot
        ))
    };
    let (bus, unit) = slot.split_once(':').ok_or_else(invalid)?;
    let bus: u8 = bus.trim().parse().map_err(|_| invalid())?;
    let unit: u8 = unit.trim().parse().map_err(|_| invalid())?;
    if bus >= SCSI_BUSES
        || unit >= SCSI_UNITS
        || unit == SCSI_CONTROLLER_UNIT
        || (bus == 0 && unit == 0)
    {
        return Err(invalid());
    }
    Ok((bus, unit))
}

/// Desired disks keyed by slot; disks without a slot take the first free one.
fn desired_disks(disks: &[VmVirtualDisk]) -> Result<BTreeMap<(u8, u8), String>> {
    let mut desired = BTreeMap::new();

    for disk in disks.iter().filter(|d| !d.slot.is_empty()) {
        let slot = parse_slot(&disk.slot)?;
        if desired.insert(slot, disk.virtual_disk_id.clone()).is_some() {
            return Err(Error::InvalidArgument(format!(
                "virtual disk slot {} is used more than once",
                disk.slot
            )));
        }
    }

    for disk in disks.iter().filter(|d| d.slot.is_empty()) {
        let slot = data_slots()
            .find(|slot| !desired.contains_key(slot))
            .ok_or_else(|| Error::InvalidArgument("no free virtual disk slot left".to_string()))?;
        desired.insert(slot, disk.virtual_disk_id.clone());
    }

    desired.retain(|_, id| !id.is_empty());
    Ok(desired)
}

fn apply_disks(vmx: &mut Vmx, disks: &[VmVirtualDisk]) -> Result<()> {
    let desired = desired_disks(disks)?;

    for (bus, unit) in data_slots() {
        let prefix = format!("scsi{}:{}.", bus, unit);
        match desired.get(&(bus, unit)) {
            None => {
                vmx.remove_prefix(&prefix);
            }
            Some(file) => {
                vmx.set(&format!("{}deviceType", prefix), "scsi-hardDisk");
                vmx.set(&format!("{}fileName", prefix), file.clone());
                vmx.set(&format!("{}present", prefix), "TRUE");
            }
        }
    }
    Ok(())
}

fn apply_network_interfaces(
    vmx: &mut Vmx,
    nics: &[NetworkInterface],
    first_provisioning: bool,
) -> Result<()> {
    if first_provisioning {
        for index in 0..NIC_SLOTS {
            vmx.remove_prefix(&format!("ethernet{}.", index));
        }
    }
    for index in nics.len()..NIC_SLOTS {
        vmx.remove_prefix(&format!("ethernet{}.", index));
    }

    let default_nic_type = nics
        .first()
        .map(|nic| nic.nic_type.as_str())
        .filter(|nic_type| !nic_type.is_empty())
        .unwrap_or(DEFAULT_NIC_TYPE);

    for (index, nic) in nics.iter().enumerate().take(NIC_SLOTS) {
        let prefix = format!("ethernet{}.", index);
        let key = |name: &str| format!("{}{}", prefix, name);

        if nic.virtual_network.is_empty() {
            vmx.remove_prefix(&prefix);
            continue;
        }

        if vmx.has_prefix(&prefix) {
            vmx.set(&key("networkName"), nic.virtual_network.clone());
            if !nic.nic_type.is_empty() {
                vmx.set(&key("virtualDev"), nic.nic_type.clone());
            }
            let is_static = vmx.get(&key("addressType")) == Some("static");
            if !nic.mac_address.is_empty() {
                vmx.set(&key("addressType"), "static");
                vmx.set(&key("address"), nic.mac_address.clone());
                vmx.remove(&key("generatedAddress"));
                vmx.remove(&key("generatedAddressOffset"));
            } else if is_static {
                return Err(Error::InvalidArgument(format!(
                    "network interface {} has a static MAC address, switching back to a generated one is not supported",
                    index
                )));
            }
        } else {
            vmx.set(&key("networkName"), nic.virtual_network.clone());
            if !nic.mac_address.is_empty() {
                vmx.set(&key("addressType"), "static");
                vmx.set(&key("address"), nic.mac_address.clone());
            }
            let nic_type = if nic.nic_type.is_empty() {
                default_nic_type
            } else {
                nic.nic_type.as_str()
            };
            vmx.set(&key("virtualDev"), nic_type);
            vmx.set(&key("present"), "TRUE");
        }
    }
    Ok(())
}

/// Reconcile `vmx` with the desired settings of `vm`.
///
/// On first provisioning every imported NIC is replaced by the desired list.
pub fn apply(vmx: &mut Vmx, vm: &VirtualMachine, first_provisioning: bool) -> Result<()> {
    if vm.mem_size > 0 {
        vmx.set("memSize", vm.mem_size.to_string());
    }
    if vm.num_v_cpus > 0 {
        vmx.set("numvcpus", vm.num_v_cpus.to_string());
    }
    if vm.virtual_hw_ver > 0 {
        vmx.set("virtualHW.version", vm.virtual_hw_ver.to_string());
    }
    if !vm.os.is_empty() {
        vmx.set("guestOS", vm.os.clone());
    }
    if !vm.boot_firmware.is_empty() {
        vmx.set("firmware", vm.boot_firmware.clone());
    }
    if !vm.notes.is_empty() || vmx.contains_key("annotation") {
        vmx.set("annotation", encode_notes(&vm.notes));
    }

    for item in &vm.info {
        vmx.set(&format!("{}{}", GUESTINFO_PREFIX, item.key), item.value.clone());
    }

    apply_disks(vmx, &vm.virtual_disks)?;
    apply_network_interfaces(vmx, &vm.network_interfaces, first_provisioning)?;

    vmx.set("disk.EnableUUID", "TRUE");
    Ok(())
}

/// Drop every scsi device except the boot disk, so destroying the guest
/// leaves attached virtual disks in place.
pub fn strip_data_disks(vmx: &mut Vmx) -> usize {
    let mut removed = 0;
    for bus in 0..SCSI_BUSES {
        for unit in 0..SCSI_UNITS {
            if bus == 0 && unit == 0 {
                continue;
            }
            removed += vmx.remove_prefix(&format!("scsi{}:{}.", bus, unit));
        }
    }
    removed
}

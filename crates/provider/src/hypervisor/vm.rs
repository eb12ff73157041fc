/// Virtual machine driver
///
/// Guests are either built from a blank vmx template or imported with ovftool,
/// then reconciled through their vmx file. Reads always go back to the host.

use common::models::{
    ConnectionInfo, DiskType, KeyValuePair, NetworkInterface, PowerState, VirtualMachine, VmSource,
    VmVirtualDisk, ROOT_POOL_ID, ROOT_POOL_NAME,
};
use common::utils::quote;
use common::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use super::{ovf, pool, power, vmx};
use crate::parsers::listing::parse_vm_summary;
use crate::parsers::template::{has_template_syntax, render_template};
use crate::parsers::Vmx;
use crate::projection::Project;
use crate::properties::{Inputs, Properties};
use crate::session::Host;
use crate::storage::{disk, grow_virtual_disk, validate_disk_store};

const DELETE_SHUTDOWN_TIMEOUT: u32 = 30;
const DELETE_SETTLE: Duration = Duration::from_secs(5);
const LOOKUP_STARTUP_TIMEOUT: u32 = 1;

fn key_value_pairs(props: &Properties<'_>, key: &str) -> Vec<KeyValuePair> {
    props
        .objects(key)
        .iter()
        .filter_map(|item| {
            let key = item.string("key").filter(|k| !k.is_empty())?;
            Some(KeyValuePair::new(key, item.string("value").unwrap_or_default()))
        })
        .collect()
}

pub fn parse(id: &str, inputs: &Inputs, connection: &ConnectionInfo) -> Result<VirtualMachine> {
    let props = Properties::new(inputs);
    let defaults = VirtualMachine::default();

    let source = if let Some(name) = props.string("cloneFromVirtualMachine").filter(|s| !s.is_empty()) {
        VmSource::Clone(ovf::clone_source(connection, &name))
    } else if let Some(path) = props.string("ovfLocalSource").filter(|s| !s.is_empty()) {
        VmSource::Local(path)
    } else if let Some(location) = props.string("ovfSource").filter(|s| !s.is_empty()) {
        location.parse()?
    } else {
        VmSource::None
    };

    let resource_pool_name = match props.string("resourcePoolName").filter(|s| !s.is_empty()) {
        Some(name) if name == ROOT_POOL_ID => ROOT_POOL_NAME.to_string(),
        Some(name) => name,
        None => defaults.resource_pool_name.clone(),
    };

    let boot_disk_type = match props.string("bootDiskType").filter(|s| !s.is_empty()) {
        Some(value) => value.parse()?,
        None => DiskType::Thin,
    };

    let power = match props.string("power").filter(|s| !s.is_empty()) {
        Some(value) => Some(value.parse::<PowerState>()?),
        None => None,
    };

    let network_interfaces = props
        .objects("networkInterfaces")
        .iter()
        .map(|nic| NetworkInterface {
            mac_address: nic.string("macAddress").unwrap_or_default(),
            nic_type: nic.string("nicType").unwrap_or_default(),
            virtual_network: nic.string("virtualNetwork").unwrap_or_default(),
        })
        .collect();

    let virtual_disks = props
        .objects("virtualDisks")
        .iter()
        .map(|item| VmVirtualDisk {
            slot: item.string("slot").unwrap_or_default(),
            virtual_disk_id: item.string("virtualDiskId").unwrap_or_default(),
        })
        .collect();

    let positive_u32 = |key: &str, default: u32| -> Result<u32> {
        Ok(props.number_u32(key)?.filter(|v| *v > 0).unwrap_or(default))
    };

    Ok(VirtualMachine {
        id: id.to_string(),
        name: props.required_string("name")?,
        disk_store: props.required_string("diskStore")?,
        resource_pool_name,
        boot_firmware: props.string("bootFirmware").unwrap_or_default(),
        boot_disk_size: props
            .number("bootDiskSize")?
            .filter(|v| *v > 0)
            .unwrap_or(defaults.boot_disk_size),
        boot_disk_type,
        mem_size: props
            .number("memSize")?
            .filter(|v| *v > 0)
            .unwrap_or(defaults.mem_size),
        num_v_cpus: positive_u32("numVCpus", defaults.num_v_cpus)?,
        virtual_hw_ver: positive_u32("virtualHWVer", defaults.virtual_hw_ver)?,
        os: props
            .string("os")
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.os),
        power,
        ip_address: String::new(),
        network_interfaces,
        virtual_disks,
        ovf_properties: key_value_pairs(&props, "ovfProperties"),
        ovf_properties_timer: positive_u32("ovfPropertiesTimer", defaults.ovf_properties_timer)?,
        info: key_value_pairs(&props, "info"),
        notes: props.string("notes").unwrap_or_default(),
        source,
        startup_timeout: positive_u32("startupTimeout", defaults.startup_timeout)?,
        shutdown_timeout: positive_u32("shutdownTimeout", defaults.shutdown_timeout)?,
    })
}

/// Render templated `ovfProperties` and `info` values against the VM itself.
pub fn render_templates(vm: &mut VirtualMachine) -> Result<()> {
    let needs_rendering = vm
        .ovf_properties
        .iter()
        .chain(vm.info.iter())
        .any(|item| has_template_syntax(&item.value));
    if !needs_rendering {
        return Ok(());
    }

    let context = Value::Object(vm.project(true)?);
    for item in vm.ovf_properties.iter_mut().chain(vm.info.iter_mut()) {
        if has_template_syntax(&item.value) {
            item.value = render_template(&item.value, &context)?;
        }
    }
    Ok(())
}

/// Id of the first registered guest named `name`.
pub async fn find_id(host: &Host, name: &str) -> Result<Option<String>> {
    let command = format!(
        "vim-cmd vmsvc/getallvms 2>/dev/null |sort -n | grep -m 1 {} |awk '{{print $1}}'",
        quote(&format!("[0-9] * {} .*{}", name, name))
    );
    let output = host.run(&command, "get virtual machine id").await?.output;
    Ok((!output.is_empty()).then_some(output))
}

/// Absolute path of a guest's vmx file.
async fn vmx_path(host: &Host, id: &str) -> Result<String> {
    let id = quote(id);
    let disk_store = host
        .execute(
            &format!(
                "vim-cmd vmsvc/get.config {} | grep vmPathName|grep -oE \"\\[.*\\]\"",
                id
            ),
            "get virtual machine datastore",
        )
        .await?;
    let file = host
        .execute(
            &format!(
                "vim-cmd vmsvc/get.config {} | grep vmPathName|awk '{{print $NF}}'|sed 's/[\"|,]//g'",
                id
            ),
            "get virtual machine vmx file",
        )
        .await?;

    let disk_store = disk_store.trim_start_matches('[').trim_end_matches(']');
    if disk_store.is_empty() || file.is_empty() {
        return Err(Error::Hypervisor(format!(
            "failed to locate the vmx file of virtual machine {}",
            id
        )));
    }
    Ok(format!("/vmfs/volumes/{}/{}", disk_store, file))
}

async fn read_vmx(host: &Host, id: &str) -> Result<(String, Vmx)> {
    let path = vmx_path(host, id).await?;
    let text = host
        .execute(&format!("cat {}", quote(&path)), "read vmx file")
        .await?;
    Ok((path, Vmx::parse(&text)))
}

async fn write_vmx(host: &Host, id: &str, path: &str, content: &Vmx) -> Result<()> {
    host.write_file(&content.encode(), path, "write vmx file")
        .await?;
    reload(host, id).await
}

async fn reload(host: &Host, id: &str) -> Result<()> {
    host.execute(
        &format!("vim-cmd vmsvc/reload {}", quote(id)),
        "reload virtual machine",
    )
    .await?;
    Ok(())
}

/// Reconcile the guest's vmx file with `vm`.
async fn rewrite_vmx(host: &Host, vm: &VirtualMachine, first_provisioning: bool) -> Result<()> {
    let (path, mut content) = read_vmx(host, &vm.id).await?;
    vmx::apply(&mut content, vm, first_provisioning)?;
    write_vmx(host, &vm.id, &path, &content).await
}

/// Path of the boot disk descriptor.
async fn boot_disk_path(host: &Host, id: &str) -> Result<String> {
    let output = host
        .execute(
            &format!(
                "vim-cmd vmsvc/device.getdevices {} | grep -A10 -e 'key = 2000' -e 'key = 3000' -e 'key = 16000'|grep -m 1 fileName",
                quote(id)
            ),
            "get boot disk path",
        )
        .await?;
    let path = output
        .replace("fileName = \"[", "/vmfs/volumes/")
        .replace("] ", "/")
        .replace("\",", "");
    let path = path.trim();
    if path.is_empty() {
        return Err(Error::Hypervisor(format!(
            "failed to find the boot disk of virtual machine {}",
            id
        )));
    }
    Ok(path.to_string())
}

async fn grow_boot_disk(host: &Host, vm: &VirtualMachine) -> Result<bool> {
    let path = boot_disk_path(host, &vm.id).await?;
    grow_virtual_disk(host, &path, vm.boot_disk_size)
        .await
        .map_err(|e| Error::Hypervisor(format!("failed to grow boot disk of {}: {}", vm.name, e)))
}

/// Blank guest: vmx template, boot disk and registration. The guest directory
/// is removed again when any step after its creation fails.
async fn create_plain(host: &Host, vm: &VirtualMachine) -> Result<()> {
    let directory = format!("/vmfs/volumes/{}/{}", vm.disk_store, vm.name);
    let boot_disk = format!("{}/{}.vmdk", directory, vm.name);

    let existing = host
        .run(&format!("ls -d {}", quote(&boot_disk)), "check if boot disk exists")
        .await?;
    if existing.success() {
        return Err(Error::AlreadyExists(format!(
            "virtual machine may already exist: {}",
            boot_disk
        )));
    }

    let has_directory = host
        .run(&format!("ls -d {}", quote(&directory)), "check if guest path exists")
        .await?;
    if !has_directory.success() {
        host.execute(&format!("mkdir {}", quote(&directory)), "create guest path")
            .await?;
    }

    if let Err(error) = provision_plain(host, vm, &directory, &boot_disk).await {
        if let Err(e) = host
            .execute(&format!("rm -fr {}", quote(&directory)), "clean up guest path")
            .await
        {
            warn!("failed to clean up {}: {}", directory, e);
        }
        return Err(error);
    }
    Ok(())
}

async fn provision_plain(
    host: &Host,
    vm: &VirtualMachine,
    directory: &str,
    boot_disk: &str,
) -> Result<()> {
    let vmx_file = format!("{}/{}.vmx", directory, vm.name);
    host.write_file(&vmx::plain_vmx(vm).encode(), &vmx_file, "write vmx file")
        .await?;

    host.execute(
        &format!(
            "vmkfstools -c {}G -d {} {}",
            vm.boot_disk_size,
            vm.boot_disk_type,
            quote(boot_disk)
        ),
        "create boot disk",
    )
    .await?;

    let pool_id = pool::pool_id(host, &vm.resource_pool_name)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("resource pool {} not found", vm.resource_pool_name))
        })?;

    host.execute(
        &format!(
            "vim-cmd solo/registervm {} {} {}",
            quote(&vmx_file),
            quote(&vm.name),
            quote(&pool_id)
        ),
        "register virtual machine",
    )
    .await?;
    Ok(())
}

pub async fn create(host: &Host, vm: &VirtualMachine) -> Result<VirtualMachine> {
    let mut vm = vm.clone();
    render_templates(&mut vm)?;

    validate_disk_store(host, &vm.disk_store).await?;

    let mut injected_properties = false;
    match find_id(host, &vm.name).await? {
        Some(id) => {
            info!("adopting existing virtual machine {} ({})", vm.name, id);
            if power::power_state(host, &id).await?.is_active() {
                power::power_off(host, &id, vm.shutdown_timeout).await?;
            }
        }
        None if vm.source == VmSource::None => {
            info!("🖥️ creating virtual machine {}", vm.name);
            create_plain(host, &vm).await?;
        }
        None => {
            injected_properties = ovf::import(host, &vm).await?;
        }
    }

    vm.id = find_id(host, &vm.name).await?.ok_or_else(|| {
        Error::Hypervisor(format!("failed to get the id of virtual machine {}", vm.name))
    })?;

    if injected_properties {
        if power::power_state(host, &vm.id).await? != PowerState::On {
            return Err(Error::Hypervisor(format!(
                "virtual machine {} is not powered on after injecting OVF properties",
                vm.name
            )));
        }
        info!(
            "waiting {}s for {} to apply its OVF properties",
            vm.ovf_properties_timer, vm.name
        );
        host.sleep(Duration::from_secs(u64::from(vm.ovf_properties_timer)))
            .await?;
        power::power_off(host, &vm.id, vm.shutdown_timeout)
            .await
            .map_err(|e| {
                Error::Hypervisor(format!(
                    "failed to power off {} after injecting OVF properties: {}",
                    vm.name, e
                ))
            })?;
    }

    grow_boot_disk(host, &vm).await?;
    rewrite_vmx(host, &vm, true).await?;

    if matches!(vm.power, None | Some(PowerState::On)) {
        power::power_on(host, &vm.id).await?;
        vm.power = Some(PowerState::On);
    } else {
        vm.power = Some(power::power_state(host, &vm.id).await?);
    }

    info!("✅ virtual machine {} is ready ({})", vm.name, vm.id);
    Ok(vm)
}

pub async fn update(host: &Host, vm: &VirtualMachine) -> Result<VirtualMachine> {
    let mut vm = vm.clone();
    render_templates(&mut vm)?;

    info!("updating virtual machine {} ({})", vm.name, vm.id);

    if power::power_state(host, &vm.id).await?.is_active() {
        power::power_off(host, &vm.id, vm.shutdown_timeout).await?;
    }

    rewrite_vmx(host, &vm, false).await?;

    if grow_boot_disk(host, &vm).await? {
        reload(host, &vm.id).await?;
    }

    if vm.power == Some(PowerState::On) {
        power::power_on(host, &vm.id).await?;
    }
    vm.power = Some(power::power_state(host, &vm.id).await?);

    Ok(vm)
}

pub async fn delete(host: &Host, id: &str) -> Result<()> {
    info!("🗑️ deleting virtual machine {}", id);

    power::power_off(host, id, DELETE_SHUTDOWN_TIMEOUT).await?;

    // Detach data disks so they outlive the guest.
    let stripped = async {
        let (path, mut content) = read_vmx(host, id).await?;
        if vmx::strip_data_disks(&mut content) > 0 {
            write_vmx(host, id, &path, &content).await?;
        }
        Ok::<_, Error>(())
    };
    if let Err(e) = stripped.await {
        warn!("failed to detach data disks of {}: {}", id, e);
    }

    host.sleep(DELETE_SETTLE).await?;

    host.execute(
        &format!("vim-cmd vmsvc/destroy {}", quote(id)),
        "destroy virtual machine",
    )
    .await?;
    Ok(())
}

/// Id of the resource pool a guest runs in, from hostd's pool inventory.
async fn resource_pool_of(host: &Host, id: &str) -> Result<String> {
    let command = format!(
        "grep -A2 {} /etc/vmware/hostd/pools.xml | grep -o {}",
        quote(&format!("objID>{}</objID", id)),
        quote("resourcePool.*resourcePool")
    );
    let output = host.run(&command, "get virtual machine resource pool").await?.output;
    let pool_id = output
        .replace("resourcePool>", "")
        .replace("</resourcePool", "");
    let pool_id = pool_id.trim();

    if pool_id.is_empty() {
        Ok(ROOT_POOL_NAME.to_string())
    } else {
        pool::pool_name(host, pool_id).await
    }
}

pub async fn read(host: &Host, id: &str, startup_timeout: u32) -> Result<VirtualMachine> {
    let summary = host
        .run(
            &format!("vim-cmd vmsvc/get.summary {}", quote(id)),
            "get virtual machine summary",
        )
        .await?;
    if summary.output.contains("Unable to find a VM corresponding") {
        return Err(Error::NotFound(format!(
            "unable to find a virtual machine corresponding to the id '{}'",
            id
        )));
    }
    let summary = parse_vm_summary(&summary.output);
    if summary.name.is_empty() {
        return Err(Error::NotFound(format!(
            "unable to find a virtual machine corresponding to the id '{}'",
            id
        )));
    }

    let defaults = VirtualMachine::default();
    let resource_pool_name = resource_pool_of(host, id).await?;

    let (_, content) = read_vmx(host, id).await?;
    let observed = vmx::snapshot(&content);

    let power = power::power_state(host, id).await?;
    let ip_address = if power == PowerState::On {
        power::ip_address(host, id, startup_timeout).await?
    } else {
        String::new()
    };

    let (boot_disk_size, boot_disk_type) = match boot_disk_path(host, id).await {
        Ok(path) => match disk::read(host, &path).await {
            Ok(boot_disk) => (boot_disk.size, boot_disk.disk_type),
            Err(e) => {
                warn!("failed to read boot disk of {}: {}", id, e);
                (0, DiskType::Unknown)
            }
        },
        Err(e) => {
            warn!("failed to locate boot disk of {}: {}", id, e);
            (0, DiskType::Unknown)
        }
    };

    Ok(VirtualMachine {
        id: id.to_string(),
        name: summary.name,
        disk_store: summary.disk_store,
        resource_pool_name,
        boot_firmware: observed.boot_firmware.unwrap_or_default(),
        boot_disk_size,
        boot_disk_type,
        mem_size: observed.mem_size.unwrap_or(defaults.mem_size),
        num_v_cpus: observed.num_v_cpus.unwrap_or(defaults.num_v_cpus),
        virtual_hw_ver: observed.virtual_hw_ver.unwrap_or(defaults.virtual_hw_ver),
        os: observed.os.unwrap_or(defaults.os),
        power: Some(power),
        ip_address,
        network_interfaces: observed.network_interfaces,
        virtual_disks: observed.virtual_disks,
        ovf_properties: Vec::new(),
        ovf_properties_timer: defaults.ovf_properties_timer,
        info: observed.info,
        notes: observed.notes,
        source: VmSource::None,
        startup_timeout,
        shutdown_timeout: defaults.shutdown_timeout,
    })
}

/// Guest lookup by display name.
pub async fn get_by_name(host: &Host, name: &str) -> Result<VirtualMachine> {
    let not_found = || {
        Error::NotFound(format!(
            "unable to find a virtual machine corresponding to the name '{}'",
            name
        ))
    };
    let id = find_id(host, name).await?.ok_or_else(not_found)?;
    read(host, &id, LOOKUP_STARTUP_TIMEOUT).await.map_err(|e| {
        if e.is_not_found() {
            not_found()
        } else {
            e
        }
    })
}

pub async fn get_by_id(host: &Host, id: &str) -> Result<VirtualMachine> {
    read(host, id, LOOKUP_STARTUP_TIMEOUT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{connection_info, ScriptedShell};
    use serde_json::json;
    use std::sync::Arc;

    const GB: u64 = 1024 * 1024 * 1024;

    fn inputs(value: Value) -> Inputs {
        value.as_object().cloned().unwrap()
    }

    fn host(shell: &Arc<ScriptedShell>) -> Host {
        Host::with_shell(connection_info(), shell.clone())
    }

    /// A registered, powered-off guest `web-01` with id 7.
    fn script_guest(shell: &ScriptedShell) {
        shell.on("vim-cmd vmsvc/getallvms", "7");
        shell.on("power.getstate", "Retrieved runtime info\nPowered off");
        shell.on("grep -oE \"\\[.*\\]\"", "[datastore1]");
        shell.on("awk '{print $NF}'", "web-01/web-01.vmx");
        shell.on(
            "cat /vmfs/volumes/datastore1/web-01/web-01.vmx",
            "memSize = \"512\"\nnumvcpus = \"1\"\nscsi0:0.fileName = \"web-01.vmdk\"",
        );
        shell.on(
            "device.getdevices",
            "fileName = \"[datastore1] web-01/web-01.vmdk\",",
        );
        shell.on("awk '{print $5}'", &(16 * GB).to_string());
        shell.on(
            "get.summary 7",
            "name = \"web-01\",\n vmPathName = \"[datastore1] web-01/web-01.vmx\",",
        );
    }

    #[test]
    fn test_parse_defaults_and_sources() {
        let connection = connection_info();
        let vm = parse(
            "",
            &inputs(json!({
                "name": "web-01",
                "diskStore": "datastore1",
                "resourcePoolName": "ha-root-pool",
                "networkInterfaces": [{ "virtualNetwork": "VM Network", "nicType": "vmxnet3" }],
                "cloneFromVirtualMachine": "template-01",
                "startupTimeout": 0
            })),
            &connection,
        )
        .unwrap();

        assert_eq!(vm.resource_pool_name, "/");
        assert_eq!(vm.network_interfaces[0].nic_type, "vmxnet3");
        assert_eq!(vm.network_interfaces[0].mac_address, "");
        assert_eq!(vm.startup_timeout, 120);
        assert_eq!(vm.shutdown_timeout, 20);
        assert_eq!(vm.ovf_properties_timer, 90);
        assert_eq!(vm.boot_disk_size, 16);
        assert_eq!(
            vm.source,
            VmSource::Clone("vi://root:secret@esxi.local:443/template-01".into())
        );

        let vm = parse(
            "",
            &inputs(json!({ "name": "a", "diskStore": "ds", "ovfLocalSource": "/tmp/a.ova" })),
            &connection,
        )
        .unwrap();
        assert_eq!(vm.source, VmSource::Local("/tmp/a.ova".into()));
        assert_eq!(vm.source.to_string(), "local:///tmp/a.ova");
    }

    #[test]
    fn test_render_templates() {
        let mut vm = VirtualMachine {
            name: "web-01".into(),
            info: vec![KeyValuePair::new("hostname", "{{ name | upper }}")],
            ovf_properties: vec![KeyValuePair::new("guestinfo.mem", "{{ memSize }}")],
            ..Default::default()
        };
        render_templates(&mut vm).unwrap();
        assert_eq!(vm.info[0].value, "WEB-01");
        assert_eq!(vm.ovf_properties[0].value, "512");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_adopts_existing_guest() {
        let shell = ScriptedShell::new();
        script_guest(&shell);
        let vm = parse(
            "",
            &inputs(json!({ "name": "web-01", "diskStore": "datastore1", "power": "off" })),
            &connection_info(),
        )
        .unwrap();

        let first = create(&host(&shell), &vm).await.unwrap();
        let second = create(&host(&shell), &vm).await.unwrap();
        assert_eq!(first.id, "7");
        assert_eq!(second.id, first.id);
        assert_eq!(shell.count("solo/registervm"), 0);
        assert_eq!(shell.count("vmkfstools -X"), 0);
        assert_eq!(shell.count("vim-cmd vmsvc/reload 7"), 2);
        assert!(shell
            .uploaded("/vmfs/volumes/datastore1/web-01/web-01.vmx")
            .unwrap()
            .contains("disk.EnableUUID = \"TRUE\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_plain_guest() {
        let shell = ScriptedShell::new();
        script_guest(&shell);
        shell.once("vim-cmd vmsvc/getallvms", "");
        shell.on_status("ls -d /vmfs/volumes/datastore1/web-01", "No such file or directory", 1);
        shell.on("<name>dev</name>", "objID>pool1</objID");
        shell.on("power.getstate", "Powered on");
        shell.once("power.getstate", "Powered off");
        let vm = parse(
            "",
            &inputs(json!({
                "name": "web-01",
                "diskStore": "datastore1",
                "resourcePoolName": "dev",
                "bootDiskSize": 32
            })),
            &connection_info(),
        )
        .unwrap();

        let created = create(&host(&shell), &vm).await.unwrap();
        assert_eq!(created.id, "7");
        assert_eq!(created.power, Some(PowerState::On));
        assert_eq!(shell.count("mkdir /vmfs/volumes/datastore1/web-01"), 1);
        assert_eq!(
            shell.count("vmkfstools -c 32G -d thin /vmfs/volumes/datastore1/web-01/web-01.vmdk"),
            1
        );
        assert_eq!(
            shell.count("vim-cmd solo/registervm /vmfs/volumes/datastore1/web-01/web-01.vmx web-01 pool1"),
            1
        );
        assert_eq!(shell.count("vim-cmd vmsvc/power.on 7"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_guest_cleans_up_on_failure() {
        let shell = ScriptedShell::new();
        shell.on_status("ls -d /vmfs/volumes/datastore1/web-01", "No such file or directory", 1);
        shell.on_status("vmkfstools -c", "Failed to create virtual disk", 1);
        let vm = parse(
            "",
            &inputs(json!({ "name": "web-01", "diskStore": "datastore1" })),
            &connection_info(),
        )
        .unwrap();

        assert!(create(&host(&shell), &vm).await.is_err());
        assert_eq!(shell.count("rm -fr /vmfs/volumes/datastore1/web-01"), 1);
        assert_eq!(shell.count("solo/registervm"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_detaches_data_disks() {
        let shell = ScriptedShell::new();
        script_guest(&shell);
        shell.on(
            "cat /vmfs/volumes/datastore1/web-01/web-01.vmx",
            "scsi0:0.fileName = \"web-01.vmdk\"\nscsi0:1.fileName = \"/vmfs/volumes/datastore1/data/a.vmdk\"",
        );

        delete(&host(&shell), "7").await.unwrap();
        let written = shell
            .uploaded("/vmfs/volumes/datastore1/web-01/web-01.vmx")
            .unwrap();
        assert!(!written.contains("scsi0:1"));
        assert_eq!(shell.count("vim-cmd vmsvc/destroy 7"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_and_lookups() {
        let shell = ScriptedShell::new();
        script_guest(&shell);

        let vm = get_by_name(&host(&shell), "web-01").await.unwrap();
        assert_eq!(vm.id, "7");
        assert_eq!(vm.disk_store, "datastore1");
        assert_eq!(vm.resource_pool_name, "/");
        assert_eq!(vm.boot_disk_size, 16);
        assert_eq!(vm.power, Some(PowerState::Off));

        shell.on("get.summary 8", "vim.fault.NotFound: Unable to find a VM corresponding to \"8\"");
        let err = get_by_id(&host(&shell), "8").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to find a virtual machine corresponding to the id '8'"
        );

        shell.on("vim-cmd vmsvc/getallvms", "");
        let err = get_by_name(&host(&shell), "db-01").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to find a virtual machine corresponding to the name 'db-01'"
        );
    }
}

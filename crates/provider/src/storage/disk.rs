/// Virtual disk driver
///
/// Standalone vmdk files managed with `vmkfstools`. The id is the absolute
/// path `/vmfs/volumes/<diskStore>/<directory>/<name>`.

use common::models::{DiskType, VirtualDisk};
use common::utils::quote;
use common::{Error, Result};
use tracing::{info, warn};

use crate::properties::{Inputs, Properties};
use crate::session::Host;

const VOLUMES_ROOT: &str = "/vmfs/volumes";
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;
const DEFAULT_SIZE_GB: u64 = 1;

const TYPE_MARKERS: [(&str, DiskType); 3] = [
    ("NOMP -- :", DiskType::Thin),
    ("VMFS Z- LVID:", DiskType::ZeroedThick),
    ("VMFS -- LVID:", DiskType::EagerZeroedThick),
];

/// Absolute path of a disk file.
pub fn disk_path(disk_store: &str, directory: &str, name: &str) -> String {
    let directory = directory.trim_matches('/');
    if directory.is_empty() {
        format!("{}/{}/{}", VOLUMES_ROOT, disk_store, name)
    } else {
        format!("{}/{}/{}/{}", VOLUMES_ROOT, disk_store, directory, name)
    }
}

/// Splits a disk id into `(diskStore, directory, name)`. A disk in the
/// datastore root has an empty directory.
pub fn split_id(id: &str) -> Result<(String, String, String)> {
    let invalid = || Error::InvalidArgument(format!("virtual disk id is invalid: {}", id));

    let rest = id
        .strip_prefix(VOLUMES_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(invalid)?;
    let (disk_store, path) = rest.split_once('/').ok_or_else(invalid)?;
    let (directory, name) = path.rsplit_once('/').unwrap_or(("", path));
    if disk_store.is_empty() || name.is_empty() {
        return Err(invalid());
    }
    Ok((
        disk_store.to_string(),
        directory.trim_matches('/').to_string(),
        name.to_string(),
    ))
}

fn with_vmdk_suffix(name: &str) -> String {
    if name.ends_with(".vmdk") {
        name.to_string()
    } else {
        format!("{}.vmdk", name)
    }
}

/// `disk1.vmdk` -> `disk1-flat.vmdk`, where the data of a descriptor lives.
fn flat_file_name(name: &str) -> Result<String> {
    match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => Ok(format!("{}-flat.{}", base, ext)),
        _ => Err(Error::InvalidArgument(format!("virtual disk name is invalid: {}", name))),
    }
}

pub fn parse(id: &str, inputs: &Inputs) -> Result<VirtualDisk> {
    let props = Properties::new(inputs);

    let (disk_store, directory, name) = if id.is_empty() {
        (
            props.required_string("diskStore")?,
            props
                .required_string("directory")?
                .trim_matches('/')
                .to_string(),
            with_vmdk_suffix(&props.required_string("name")?),
        )
    } else {
        split_id(id)?
    };

    let disk_type = match props.string("diskType").filter(|s| !s.is_empty()) {
        Some(value) => value.parse()?,
        None => DiskType::Thin,
    };
    let size = props
        .number("size")?
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_SIZE_GB);

    Ok(VirtualDisk {
        id: disk_path(&disk_store, &directory, &name),
        name,
        disk_store,
        directory,
        disk_type,
        size,
    })
}

/// Make sure a datastore is mounted, rescanning the filesystems once if it is not.
pub async fn validate_disk_store(host: &Host, disk_store: &str) -> Result<()> {
    let command = format!("ls -d {}", quote(&format!("{}/{}", VOLUMES_ROOT, disk_store)));

    if host.run(&command, "check if disk store exists").await?.success() {
        return Ok(());
    }

    host.run("esxcli storage filesystem rescan", "refresh filesystems")
        .await?;

    if host.run(&command, "check if disk store exists").await?.success() {
        Ok(())
    } else {
        Err(Error::Storage(format!("failed to access disk store {}", disk_store)))
    }
}

pub async fn create(host: &Host, disk: &VirtualDisk) -> Result<VirtualDisk> {
    info!("💾 creating virtual disk {}", disk.id);

    validate_disk_store(host, &disk.disk_store).await?;

    let directory = disk_path(&disk.disk_store, &disk.directory, "");
    let directory = directory.trim_end_matches('/');
    host.execute(&format!("mkdir -p {}", quote(directory)), "create virtual disk directory")
        .await?;

    let exists = host
        .run(&format!("ls -l {}", quote(&disk.id)), "check if virtual disk exists")
        .await?;
    if exists.success() {
        return Err(Error::AlreadyExists(format!(
            "virtual disk {} already exists",
            disk.id
        )));
    }

    let command = format!(
        "/bin/vmkfstools -c {}G -d {} {}",
        disk.size,
        disk.disk_type,
        quote(&disk.id)
    );
    host.execute(&command, "create virtual disk")
        .await
        .map_err(|e| Error::Storage(format!("failed to create virtual disk {}: {}", disk.id, e)))?;

    read(host, &disk.id).await
}

/// Size of the flat extent behind a descriptor, in whole GB.
pub async fn disk_size_gb(host: &Host, path: &str) -> Result<u64> {
    let (disk_store, directory, name) = split_id(path)?;
    let flat = disk_path(&disk_store, &directory, &flat_file_name(&name)?);

    let command = format!("ls -l {} | awk '{{print $5}}'", quote(&flat));
    let output = host.execute(&command, "get virtual disk size").await?;
    let bytes: u64 = output
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("unexpected virtual disk size '{}' for {}", output, path)))?;
    Ok(bytes / BYTES_PER_GB)
}

async fn disk_type(host: &Host, path: &str) -> Result<DiskType> {
    for (marker, disk_type) in TYPE_MARKERS {
        let command = format!(
            "vmkfstools -t0 {} | grep -q {} && echo true",
            quote(path),
            quote(marker)
        );
        let result = host.run(&command, "get virtual disk type").await?;
        if result.output == "true" {
            return Ok(disk_type);
        }
    }
    Ok(DiskType::Unknown)
}

pub async fn read(host: &Host, id: &str) -> Result<VirtualDisk> {
    let (disk_store, directory, name) = split_id(id)?;

    let exists = host
        .run(&format!("test -s {}", quote(id)), "check if virtual disk exists")
        .await?;
    if !exists.success() {
        return Err(Error::NotFound(format!("virtual disk {} not found", id)));
    }

    let size = disk_size_gb(host, id).await?;
    let disk_type = disk_type(host, id).await?;

    Ok(VirtualDisk {
        id: id.to_string(),
        name,
        disk_store,
        directory,
        disk_type,
        size,
    })
}

/// Grow `path` to `size` GB. Returns whether the disk was resized.
pub async fn grow_virtual_disk(host: &Host, path: &str, size: u64) -> Result<bool> {
    let current = disk_size_gb(host, path).await?;
    if size <= current {
        return Ok(false);
    }

    info!("growing virtual disk {} from {}G to {}G", path, current, size);
    host.execute(
        &format!("/bin/vmkfstools -X {}G {}", size, quote(path)),
        "grow virtual disk",
    )
    .await?;
    Ok(true)
}

/// Disks only grow; a smaller size is rejected before anything is changed.
pub async fn update(host: &Host, disk: &VirtualDisk) -> Result<VirtualDisk> {
    let current = disk_size_gb(host, &disk.id).await?;
    if disk.size < current {
        return Err(Error::InvalidArgument(format!(
            "virtual disk {} cannot shrink from {}G to {}G",
            disk.id, current, disk.size
        )));
    }

    if disk.size > current {
        grow_virtual_disk(host, &disk.id, disk.size).await?;
    }

    read(host, &disk.id).await
}

pub async fn delete(host: &Host, id: &str) -> Result<()> {
    info!("🗑️ deleting virtual disk {}", id);

    let (disk_store, directory, _) = split_id(id)?;
    host.execute(&format!("/bin/vmkfstools -U {}", quote(id)), "destroy virtual disk")
        .await?;

    // Drop the directory once only `.` and `..` remain. The datastore root stays.
    if directory.is_empty() {
        return Ok(());
    }
    let directory = disk_path(&disk_store, &directory, "");
    let directory = directory.trim_end_matches('/');
    let listing = host
        .run(
            &format!("ls -al {}/ | wc -l", quote(directory)),
            "check if storage directory is empty",
        )
        .await?;
    if listing.output == "3" {
        if let Err(e) = host
            .execute(&format!("rmdir {}", quote(directory)), "remove storage directory")
            .await
        {
            warn!("failed to remove empty directory {}: {}", directory, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{connection_info, ScriptedShell};
    use serde_json::json;
    use std::sync::Arc;

    const ID: &str = "/vmfs/volumes/datastore1/vms/disk1/disk1.vmdk";

    fn host(shell: &Arc<ScriptedShell>) -> Host {
        Host::with_shell(connection_info(), shell.clone())
    }

    fn inputs(value: serde_json::Value) -> Inputs {
        value.as_object().cloned().unwrap()
    }

    fn script_disk(shell: &ScriptedShell, size_gb: u64) {
        shell.on("awk '{print $5}'", &(size_gb * BYTES_PER_GB).to_string());
        shell.on("NOMP -- :", "true");
    }

    #[test]
    fn test_parse_forces_vmdk_suffix() {
        let disk = parse(
            "",
            &inputs(json!({
                "name": "disk1",
                "diskStore": "datastore1",
                "directory": "/vms/disk1/",
                "size": 10,
                "diskType": "thin"
            })),
        )
        .unwrap();
        assert_eq!(disk.name, "disk1.vmdk");
        assert_eq!(disk.id, ID);
        assert_eq!(disk.size, 10);
    }

    #[test]
    fn test_split_id() {
        let (ds, dir, name) = split_id(ID).unwrap();
        assert_eq!((ds.as_str(), dir.as_str(), name.as_str()), ("datastore1", "vms/disk1", "disk1.vmdk"));
        let (ds, dir, name) = split_id("/vmfs/volumes/ds/disk.vmdk").unwrap();
        assert_eq!((ds.as_str(), dir.as_str(), name.as_str()), ("ds", "", "disk.vmdk"));
        assert!(split_id("/vmfs/volumes/ds").is_err());
        assert!(split_id("/vmfs/volumes/ds/").is_err());
        assert!(split_id("/tmp/ds/disk.vmdk").is_err());
        assert_eq!(flat_file_name("disk1.vmdk").unwrap(), "disk1-flat.vmdk");
    }

    #[tokio::test]
    async fn test_read_probes_type_in_order() {
        let shell = ScriptedShell::new();
        shell.on("awk '{print $5}'", &(20 * BYTES_PER_GB).to_string());
        shell.on("VMFS Z- LVID:", "true");
        let disk = read(&host(&shell), ID).await.unwrap();

        assert_eq!(disk.size, 20);
        assert_eq!(disk.disk_type, DiskType::ZeroedThick);
        assert_eq!(shell.count("VMFS -- LVID:"), 0);
        assert!(shell
            .commands()
            .contains(&"ls -l /vmfs/volumes/datastore1/vms/disk1/disk1-flat.vmdk | awk '{print $5}'".to_string()));
    }

    #[tokio::test]
    async fn test_read_missing_disk() {
        let shell = ScriptedShell::new();
        shell.on_status("test -s", "", 1);
        let err = read(&host(&shell), ID).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_existing_disk_fails() {
        let shell = ScriptedShell::new();
        let disk = parse(ID, &Inputs::new()).unwrap();
        let err = create(&host(&shell), &disk).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(shell.count("vmkfstools -c"), 0);
    }

    #[tokio::test]
    async fn test_create_rescans_missing_datastore() {
        let shell = ScriptedShell::new();
        shell.on_status("ls -d", "No such file or directory", 1);
        let disk = parse(ID, &Inputs::new()).unwrap();

        let err = create(&host(&shell), &disk).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to access disk store datastore1");
        assert_eq!(shell.count("esxcli storage filesystem rescan"), 1);
        assert_eq!(shell.count("ls -d"), 2);
    }

    #[tokio::test]
    async fn test_update_grows_disk_once() {
        let shell = ScriptedShell::new();
        script_disk(&shell, 10);
        let disk = parse(ID, &inputs(json!({ "size": 20 }))).unwrap();

        update(&host(&shell), &disk).await.unwrap();
        assert_eq!(shell.count("vmkfstools -X 20G"), 1);
    }

    #[tokio::test]
    async fn test_update_refuses_to_shrink() {
        let shell = ScriptedShell::new();
        script_disk(&shell, 10);
        let disk = parse(ID, &inputs(json!({ "size": 5 }))).unwrap();

        let err = update(&host(&shell), &disk).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(shell.commands().len(), 1);
        assert_eq!(shell.count("vmkfstools -X"), 0);
    }

    #[tokio::test]
    async fn test_disk_in_datastore_root() {
        const ROOT_ID: &str = "/vmfs/volumes/datastore1/disk1.vmdk";
        let shell = ScriptedShell::new();
        shell.once_status(&format!("ls -l {}", ROOT_ID), "No such file or directory", 1);
        script_disk(&shell, 10);
        let disk = parse(
            "",
            &inputs(json!({
                "name": "disk1",
                "diskStore": "datastore1",
                "directory": "/",
                "size": 10,
                "diskType": "thin"
            })),
        )
        .unwrap();
        assert_eq!(disk.id, ROOT_ID);

        let created = create(&host(&shell), &disk).await.unwrap();
        assert_eq!(created.id, ROOT_ID);
        assert_eq!(created.directory, "");
        assert_eq!(created.size, 10);
        assert_eq!(shell.count(&format!("/bin/vmkfstools -c 10G -d thin {}", ROOT_ID)), 1);
        assert_eq!(shell.count("ls -l /vmfs/volumes/datastore1/disk1-flat.vmdk"), 1);

        delete(&host(&shell), ROOT_ID).await.unwrap();
        assert_eq!(shell.count(&format!("/bin/vmkfstools -U {}", ROOT_ID)), 1);
        assert_eq!(shell.count("wc -l"), 0);
        assert_eq!(shell.count("rmdir"), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_empty_directory() {
        let shell = ScriptedShell::new();
        shell.on("wc -l", "3");
        delete(&host(&shell), ID).await.unwrap();

        assert_eq!(shell.count("/bin/vmkfstools -U /vmfs/volumes/datastore1/vms/disk1/disk1.vmdk"), 1);
        assert_eq!(shell.count("rmdir /vmfs/volumes/datastore1/vms/disk1"), 1);
    }
}

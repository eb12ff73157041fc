/// Guest import through VMware ovftool
///
/// ovftool runs on the machine hosting the provider and pushes the guest to the
/// host over its `vi://` endpoint.

use common::models::{ConnectionInfo, VirtualMachine, VmSource};
use common::utils::{quote, urlencode};
use common::{Error, Result};
use tracing::info;

use crate::session::Host;

/// `vi://` locator of the target resource pool, credentials included.
pub fn destination(connection: &ConnectionInfo, resource_pool_name: &str) -> String {
    format!(
        "vi://{}:{}@{}:{}/{}",
        urlencode(&connection.username),
        urlencode(&connection.password),
        connection.host,
        connection.ssl_port,
        resource_pool_name.trim_start_matches('/')
    )
}

/// `vi://` locator of an existing guest on the same host, used as a clone source.
pub fn clone_source(connection: &ConnectionInfo, vm_name: &str) -> String {
    format!(
        "vi://{}:{}@{}:{}/{}",
        urlencode(&connection.username),
        urlencode(&connection.password),
        connection.host,
        connection.ssl_port,
        vm_name
    )
}

/// The full ovftool command line, plus whether OVF properties are injected.
pub fn import_command(connection: &ConnectionInfo, vm: &VirtualMachine) -> Result<(String, bool)> {
    let source = vm.source.location().ok_or_else(|| {
        Error::InvalidArgument(format!("virtual machine {} has no import source", vm.name))
    })?;
    let is_package = vm.source.is_ovf_package();

    let mut extra = String::new();
    let inject_properties = is_package && !vm.ovf_properties.is_empty();
    if inject_properties {
        extra.push_str("--X:injectOvfEnv --allowExtraConfig --powerOn");
        for property in &vm.ovf_properties {
            extra.push(' ');
            extra.push_str(&quote(&format!("--prop:{}={}", property.key, property.value)));
        }
        extra.push(' ');
    }

    let mut network = String::new();
    if is_package {
        if let Some(nic) = vm
            .network_interfaces
            .first()
            .filter(|nic| !nic.virtual_network.is_empty())
        {
            network = format!(" --network={}", quote(&nic.virtual_network));
        }
    }

    let command = format!(
        "{} --acceptAllEulas --noSSLVerify --X:useMacNaming=false {}-dm={} --name={} --overwrite -ds={}{} {} {}",
        quote(&connection.ovf_tool_location),
        extra,
        vm.boot_disk_type.ovftool_mode(),
        quote(&vm.name),
        quote(&vm.disk_store),
        network,
        quote(source),
        quote(&destination(connection, &vm.resource_pool_name))
    );
    Ok((command, inject_properties))
}

async fn check_source(source: &VmSource) -> Result<()> {
    match source {
        VmSource::Remote(url) => {
            let response = reqwest::get(url.as_str())
                .await
                .map_err(|e| Error::Hypervisor(format!("URL not accessible: {} ({})", url, e)))?;
            if response.status() != reqwest::StatusCode::OK {
                return Err(Error::Hypervisor(format!(
                    "URL not accessible: {} (status {})",
                    url,
                    response.status()
                )));
            }
            Ok(())
        }
        VmSource::Local(path) => match tokio::fs::metadata(path).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::NotFound(format!("file not found locally: {}", path))),
        },
        VmSource::Clone(_) | VmSource::None => Ok(()),
    }
}

/// Import `vm` from its source. Returns whether OVF properties were injected,
/// in which case ovftool also powered the guest on.
pub async fn import(host: &Host, vm: &VirtualMachine) -> Result<bool> {
    check_source(&vm.source).await?;

    let (command, inject_properties) = import_command(host.connection(), vm)?;
    info!("📦 importing virtual machine {} with ovftool", vm.name);

    host.execute_local(&command, "import virtual machine with ovftool")
        .await
        .map_err(|e| Error::Hypervisor(format!("there was an ovftool error: {}", e)))?;
    Ok(inject_properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{connection_info, ScriptedShell};
    use common::models::{DiskType, KeyValuePair, NetworkInterface};

    fn package_vm() -> VirtualMachine {
        VirtualMachine {
            name: "web-01".into(),
            disk_store: "datastore1".into(),
            boot_disk_type: DiskType::ZeroedThick,
            source: VmSource::Remote("https://images.example.org/alpine.ova".into()),
            network_interfaces: vec![NetworkInterface {
                virtual_network: "VM Network".into(),
                ..Default::default()
            }],
            ovf_properties: vec![KeyValuePair::new("hostname", "web 01")],
            ..Default::default()
        }
    }

    #[test]
    fn test_import_command_for_package() {
        let mut connection = connection_info();
        connection.password = "p@ss word".into();
        let (command, injected) = import_command(&connection, &package_vm()).unwrap();

        assert!(injected);
        assert_eq!(
            command,
            "ovftool --acceptAllEulas --noSSLVerify --X:useMacNaming=false \
             --X:injectOvfEnv --allowExtraConfig --powerOn '--prop:hostname=web 01' \
             -dm=thick --name=web-01 --overwrite -ds=datastore1 --network='VM Network' \
             'https://images.example.org/alpine.ova' 'vi://root:p%40ss+word@esxi.local:443/'"
        );
    }

    #[test]
    fn test_clone_skips_package_options() {
        let connection = connection_info();
        let mut vm = package_vm();
        vm.boot_disk_type = DiskType::Thin;
        vm.resource_pool_name = "dev/web".into();
        vm.source = VmSource::Clone(clone_source(&connection, "template-01"));

        let (command, injected) = import_command(&connection, &vm).unwrap();
        assert!(!injected);
        assert!(!command.contains("--network"));
        assert!(!command.contains("--prop:"));
        assert!(command.contains("-dm=thin"));
        assert!(command.ends_with("'vi://root:secret@esxi.local:443/template-01' 'vi://root:secret@esxi.local:443/dev/web'"));
    }

    #[test]
    fn test_locators_encode_credentials() {
        let mut connection = connection_info();
        connection.username = "admin@vsphere.local".into();
        connection.password = "p:ss".into();

        assert_eq!(
            clone_source(&connection, "template-01"),
            "vi://admin%40vsphere.local:p%3Ass@esxi.local:443/template-01"
        );
        assert_eq!(
            destination(&connection, "/dev/web"),
            "vi://admin%40vsphere.local:p%3Ass@esxi.local:443/dev/web"
        );
    }

    #[tokio::test]
    async fn test_missing_local_package() {
        let shell = ScriptedShell::new();
        let host = Host::with_shell(connection_info(), shell.clone());
        let mut vm = package_vm();
        vm.source = VmSource::Local("/nonexistent/alpine.ova".into());

        let err = import(&host, &vm).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(shell.local_commands().is_empty());
    }

    #[tokio::test]
    async fn test_ovftool_failure_is_masked() {
        let shell = ScriptedShell::new();
        shell.on_local_status("ovftool", "Error: cannot connect to vi://root:secret@esxi.local:443/", 1);
        let host = Host::with_shell(connection_info(), shell.clone());
        let mut vm = package_vm();
        vm.source = VmSource::Clone(clone_source(host.connection(), "template-01"));

        let err = import(&host, &vm).await.unwrap_err();
        assert!(!err.to_string().contains("secret"));
        assert_eq!(shell.local_commands().len(), 1);
    }
}

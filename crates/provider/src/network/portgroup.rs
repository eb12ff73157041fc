/// Port group driver
///
/// Port groups are addressed by the composite id `<vSwitch>/<name>`.

use common::models::PortGroup;
use common::utils::quote;
use common::{Error, Result};
use tracing::info;

use crate::parsers::listing::parse_port_group_line;
use crate::parsers::PortGroupSecurityPolicy;
use crate::properties::{Inputs, Properties};
use crate::session::Host;

pub fn compose(v_switch: &str, name: &str) -> String {
    format!("{}/{}", v_switch, name)
}

/// Splits `<vSwitch>/<name>`.
pub fn decompose(id: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = id.split('/').collect();
    match parts.as_slice() {
        [v_switch, name] if !v_switch.is_empty() && !name.is_empty() => {
            Ok((v_switch.to_string(), name.to_string()))
        }
        _ => Err(Error::InvalidArgument(format!("port group id is invalid {}", id))),
    }
}

pub fn parse(id: &str, inputs: &Inputs) -> Result<PortGroup> {
    let props = Properties::new(inputs);

    let (v_switch, name) = if id.is_empty() {
        (props.required_string("vSwitch")?, props.required_string("name")?)
    } else {
        decompose(id)?
    };

    Ok(PortGroup {
        id: compose(&v_switch, &name),
        name,
        v_switch,
        vlan: props.number_u32("vlan")?.unwrap_or(0),
        promiscuous_mode: props.boolean("promiscuousMode")?,
        mac_changes: props.boolean("macChanges")?,
        forged_transmits: props.boolean("forgedTransmits")?,
    })
}

pub async fn create(host: &Host, port_group: &PortGroup) -> Result<PortGroup> {
    info!("🌐 creating port group {}", port_group.id);

    host.execute(
        &format!(
            "esxcli network vswitch standard portgroup add -v {} -p {}",
            quote(&port_group.v_switch),
            quote(&port_group.name)
        ),
        "create port group",
    )
    .await?;

    update(host, port_group).await
}

pub async fn update(host: &Host, port_group: &PortGroup) -> Result<PortGroup> {
    let name = quote(&port_group.name);

    host.execute(
        &format!(
            "esxcli network vswitch standard portgroup set -v {} -p {}",
            port_group.vlan, name
        ),
        "set port group vlan",
    )
    .await?;

    let mut command = format!(
        "esxcli network vswitch standard portgroup policy security set -p {} -u",
        name
    );
    let flags = [
        ("--allow-promiscuous", port_group.promiscuous_mode),
        ("--allow-forged-transmits", port_group.forged_transmits),
        ("--allow-mac-change", port_group.mac_changes),
    ];
    for (flag, value) in flags {
        if let Some(value) = value {
            command.push_str(&format!(" {}={}", flag, value));
        }
    }
    host.execute(&command, "set port group security policy")
        .await?;

    read(host, &port_group.id).await
}

pub async fn read(host: &Host, id: &str) -> Result<PortGroup> {
    let (id_v_switch, name) = decompose(id)?;

    let line = host
        .run(
            &format!(
                "esxcli network vswitch standard portgroup list | grep -m 1 {}",
                quote(&format!("^{}  ", name))
            ),
            "get port group",
        )
        .await?
        .output;
    if line.is_empty() {
        return Err(Error::NotFound(format!("port group {} not found", id)));
    }
    let (v_switch, vlan) = parse_port_group_line(&line);

    let csv = host
        .execute(
            &format!(
                "esxcli --formatter=csv network vswitch standard portgroup policy security get -p {}",
                quote(&name)
            ),
            "get port group security policy",
        )
        .await?;
    let policy = PortGroupSecurityPolicy::parse(&csv)?;

    Ok(PortGroup {
        id: id.to_string(),
        name,
        v_switch: if v_switch.is_empty() { id_v_switch } else { v_switch },
        vlan,
        promiscuous_mode: Some(policy.allow_promiscuous),
        mac_changes: Some(policy.allow_mac_address_change),
        forged_transmits: Some(policy.allow_forged_transmits),
    })
}

pub async fn delete(host: &Host, id: &str) -> Result<()> {
    info!("🗑️ deleting port group {}", id);

    let (v_switch, name) = decompose(id)?;
    host.execute(
        &format!(
            "esxcli network vswitch standard portgroup remove -v {} -p {}",
            quote(&v_switch),
            quote(&name)
        ),
        "delete port group",
    )
    .await?;
    Ok(())
}

/// Standard virtual switch driver
///
/// The switch name doubles as its id.

use common::models::{Uplink, VirtualSwitch};
use common::utils::quote;
use common::{Error, Result};
use tracing::info;

use crate::parsers::listing::{parse_switch_listing, parse_switch_security, parse_uplinks};
use crate::properties::{Inputs, Properties};
use crate::session::Host;

pub fn parse(id: &str, inputs: &Inputs) -> Result<VirtualSwitch> {
    let props = Properties::new(inputs);
    let defaults = VirtualSwitch::default();

    let name = if id.is_empty() {
        props.required_string("name")?
    } else {
        id.to_string()
    };

    let uplinks_key = if props.has("upLinks") { "upLinks" } else { "uplinks" };
    let uplinks = props
        .objects(uplinks_key)
        .iter()
        .filter_map(|item| item.string("name"))
        .filter(|name| !name.is_empty())
        .map(|name| Uplink { name })
        .collect();

    Ok(VirtualSwitch {
        id: name.clone(),
        name,
        ports: props
            .number_u32("ports")?
            .filter(|v| *v > 0)
            .unwrap_or(defaults.ports),
        mtu: props
            .number_u32("mtu")?
            .filter(|v| *v > 0)
            .unwrap_or(defaults.mtu),
        link_discovery_mode: props
            .string("linkDiscoveryMode")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.link_discovery_mode),
        promiscuous_mode: props.boolean("promiscuousMode")?.unwrap_or(false),
        mac_changes: props.boolean("macChanges")?.unwrap_or(false),
        forged_transmits: props.boolean("forgedTransmits")?.unwrap_or(false),
        uplinks,
    })
}

pub async fn create(host: &Host, vswitch: &VirtualSwitch) -> Result<VirtualSwitch> {
    info!("🌐 creating vswitch {}", vswitch.name);

    let command = format!(
        "esxcli network vswitch standard add -P {} -v {}",
        vswitch.ports,
        quote(&vswitch.name)
    );
    let result = host.run(&command, "create vswitch").await?;
    if result.output.contains("this name already exists") {
        return Err(Error::AlreadyExists(format!(
            "failed to create vswitch {}: it already exists",
            vswitch.name
        )));
    }
    if !result.success() {
        return Err(Error::command("create vswitch", command, result.output, result.status));
    }

    // Settle the configuration first, but report its failure against the observed state.
    let applied = apply_settings(host, vswitch).await;
    let current = read(host, &vswitch.name).await?;
    applied?;

    Ok(current)
}

pub async fn update(host: &Host, vswitch: &VirtualSwitch) -> Result<VirtualSwitch> {
    info!("updating vswitch {}", vswitch.name);

    apply_settings(host, vswitch).await?;
    read(host, &vswitch.name).await
}

async fn apply_settings(host: &Host, vswitch: &VirtualSwitch) -> Result<()> {
    let name = quote(&vswitch.name);

    host.execute(
        &format!(
            "esxcli network vswitch standard set -m {} -c {} -v {}",
            vswitch.mtu,
            quote(&vswitch.link_discovery_mode),
            name
        ),
        "set vswitch mtu and link discovery mode",
    )
    .await?;

    host.execute(
        &format!(
            "esxcli network vswitch standard policy security set -f {} -m {} -p {} -v {}",
            vswitch.forged_transmits, vswitch.mac_changes, vswitch.promiscuous_mode, name
        ),
        "set vswitch security policy",
    )
    .await?;

    let listing = host
        .execute(
            &format!("esxcli network vswitch standard list -v {}", name),
            "list vswitch uplinks",
        )
        .await?;
    let current = parse_uplinks(&listing);

    for uplink in &vswitch.uplinks {
        if current.contains(&uplink.name) {
            continue;
        }
        let command = format!(
            "esxcli network vswitch standard uplink add -u {} -v {}",
            quote(&uplink.name),
            name
        );
        let result = host.run(&command, "add vswitch uplink").await?;
        if result.output.contains("Not a valid pnic") {
            return Err(Error::NotFound(format!("uplink not found: {}", uplink.name)));
        }
        if !result.success() {
            return Err(Error::command("add vswitch uplink", command, result.output, result.status));
        }
    }

    for existing in current
        .iter()
        .filter(|existing| !vswitch.uplinks.iter().any(|u| &u.name == *existing))
    {
        host.execute(
            &format!(
                "esxcli network vswitch standard uplink remove -u {} -v {}",
                quote(existing),
                name
            ),
            "remove vswitch uplink",
        )
        .await?;
    }

    Ok(())
}

pub async fn read(host: &Host, name: &str) -> Result<VirtualSwitch> {
    let listing = host
        .run(
            &format!("esxcli network vswitch standard list -v {}", quote(name)),
            "get vswitch",
        )
        .await?;
    if listing.output.is_empty() || !listing.success() {
        return Err(Error::NotFound(format!("vswitch {} not found", name)));
    }

    let security = host
        .execute(
            &format!(
                "esxcli network vswitch standard policy security get -v {}",
                quote(name)
            ),
            "get vswitch security policy",
        )
        .await?;

    let listing = parse_switch_listing(&listing.output);
    let security = parse_switch_security(&security);

    Ok(VirtualSwitch {
        id: name.to_string(),
        name: name.to_string(),
        ports: listing.ports,
        mtu: listing.mtu,
        link_discovery_mode: listing.link_discovery_mode,
        promiscuous_mode: security.promiscuous_mode,
        mac_changes: security.mac_changes,
        forged_transmits: security.forged_transmits,
        uplinks: listing
            .uplinks
            .into_iter()
            .map(|name| Uplink { name })
            .collect(),
    })
}

pub async fn delete(host: &Host, id: &str) -> Result<()> {
    info!("🗑️ deleting vswitch {}", id);

    host.execute(
        &format!("esxcli network vswitch standard remove -v {}", quote(id)),
        "delete vswitch",
    )
    .await?;
    Ok(())
}

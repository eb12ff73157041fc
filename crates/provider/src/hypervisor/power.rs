/// Power transitions and guest address discovery
///
/// Every wait goes through [`Host::sleep`], so a cancelled operation stops at the
/// next poll.

use common::models::PowerState;
use common::utils::quote;
use common::{Error, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::parsers::listing::parse_uptime;
use crate::session::Host;

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const POWER_OFF_SETTLE: Duration = Duration::from_secs(1);
const IPV4_PATTERN: &str =
    r"((1?[0-9][0-9]?|2[0-4][0-9]|25[0-5])\.){3}(1?[0-9][0-9]?|2[0-4][0-9]|25[0-5])";

pub async fn power_state(host: &Host, id: &str) -> Result<PowerState> {
    let output = host
        .run(
            &format!("vim-cmd vmsvc/power.getstate {}", quote(id)),
            "get virtual machine power state",
        )
        .await?
        .output;

    Ok(if output.contains("Unable to find a VM corresponding") {
        PowerState::Unknown
    } else if output.contains("Powered off") {
        PowerState::Off
    } else if output.contains("Powered on") {
        PowerState::On
    } else if output.contains("Suspended") {
        PowerState::Suspended
    } else {
        PowerState::Unknown
    })
}

pub async fn power_on(host: &Host, id: &str) -> Result<()> {
    if power_state(host, id).await? == PowerState::On {
        return Ok(());
    }

    info!("⚡ powering on virtual machine {}", id);
    let result = host
        .run(
            &format!("vim-cmd vmsvc/power.on {}", quote(id)),
            "power on virtual machine",
        )
        .await?;
    host.sleep(POLL_INTERVAL).await?;

    if power_state(host, id).await? == PowerState::On {
        Ok(())
    } else {
        Err(Error::Hypervisor(format!(
            "failed to power on virtual machine {}: {}",
            id, result.output
        )))
    }
}

/// Graceful shutdown bounded by `timeout_secs`, then a forced power off.
pub async fn power_off(host: &Host, id: &str, timeout_secs: u32) -> Result<()> {
    let state = power_state(host, id).await?;
    if state == PowerState::Off {
        return Ok(());
    }

    if state == PowerState::On && timeout_secs > 0 {
        info!("shutting down virtual machine {} (timeout {}s)", id, timeout_secs);
        if let Err(e) = host
            .execute(
                &format!("vim-cmd vmsvc/power.shutdown {}", quote(id)),
                "shutdown virtual machine",
            )
            .await
        {
            warn!("graceful shutdown of {} failed: {}", id, e);
        }
        host.sleep(POLL_INTERVAL).await?;

        let polls = timeout_secs / POLL_INTERVAL.as_secs() as u32;
        for _ in 0..polls {
            if power_state(host, id).await? == PowerState::Off {
                return Ok(());
            }
            host.sleep(POLL_INTERVAL).await?;
        }
    }

    info!("powering off virtual machine {}", id);
    host.execute(
        &format!("vim-cmd vmsvc/power.off {}", quote(id)),
        "power off virtual machine",
    )
    .await?;
    host.sleep(POWER_OFF_SETTLE).await?;
    Ok(())
}

/// First guest IPv4 address, waiting until the guest has been up for
/// `startup_timeout` seconds. Gives up with an empty string.
pub async fn ip_address(host: &Host, id: &str, startup_timeout: u32) -> Result<String> {
    let id = quote(id);
    let from_primary_nic = format!(
        "vim-cmd vmsvc/get.guest {} 2>/dev/null |sed '1!G;h;$!d' |awk '/deviceConfigId = 4000/,/ipAddress/' |grep -m 1 -oE '{}'",
        id, IPV4_PATTERN
    );
    let uptime = format!(
        "vim-cmd vmsvc/get.summary {} 2>/dev/null | grep 'uptimeSeconds ='|sed 's/^.*= //g'|sed s/,//g",
        id
    );
    let from_any_nic = format!(
        "vim-cmd vmsvc/get.guest {} 2>/dev/null | grep -m 1 '^   ipAddress = ' | grep -oE '{}'",
        id, IPV4_PATTERN
    );

    let mut uptime_secs = 0u64;
    while uptime_secs < u64::from(startup_timeout) {
        let address = host
            .run(&from_primary_nic, "get virtual machine ip address")
            .await?
            .output;
        if !address.is_empty() {
            return Ok(address);
        }

        host.sleep(POLL_INTERVAL).await?;

        let result = host.run(&uptime, "get virtual machine uptime").await?;
        match parse_uptime(&result.output) {
            Some(secs) if result.success() => uptime_secs = secs,
            _ => return Ok(String::new()),
        }
    }

    Ok(host
        .run(&from_any_nic, "get virtual machine ip address")
        .await?
        .output)
}

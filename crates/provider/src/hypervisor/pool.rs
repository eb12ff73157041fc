/// Resource pool driver
///
/// Pools are created with `vim-cmd hostsvc/rsrc/*` and resolved by name through
/// `/etc/vmware/hostd/pools.xml`. The root pool is never created or destroyed.

use common::models::{ResourcePool, Shares, ROOT_POOL_HOST_NAME, ROOT_POOL_ID, ROOT_POOL_NAME};
use common::utils::quote;
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::parsers::listing::apply_pool_config;
use crate::properties::{Inputs, Properties};
use crate::session::Host;

const POOLS_XML: &str = "/etc/vmware/hostd/pools.xml";

static PATH_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/<>\n]").expect("static regex"));

pub fn parse(id: &str, inputs: &Inputs) -> Result<ResourcePool> {
    let props = Properties::new(inputs);
    let defaults = ResourcePool::default();

    let name = props.required_string("name")?;
    let name = if name == ROOT_POOL_NAME {
        ROOT_POOL_HOST_NAME.to_string()
    } else {
        name.trim_start_matches('/').to_string()
    };

    let shares = |key: &str| -> Result<Shares> {
        match props.string(key).filter(|s| !s.is_empty()) {
            Some(value) => value.parse(),
            None => Ok(defaults.cpu_shares),
        }
    };

    Ok(ResourcePool {
        id: id.to_string(),
        name,
        cpu_min: props.number_u32("cpuMin")?.unwrap_or(defaults.cpu_min),
        cpu_min_expandable: props
            .boolean("cpuMinExpandable")?
            .unwrap_or(defaults.cpu_min_expandable),
        cpu_max: props.number_u32("cpuMax")?.unwrap_or(defaults.cpu_max),
        cpu_shares: shares("cpuShares")?,
        mem_min: props.number_u32("memMin")?.unwrap_or(defaults.mem_min),
        mem_min_expandable: props
            .boolean("memMinExpandable")?
            .unwrap_or(defaults.mem_min_expandable),
        mem_max: props.number_u32("memMax")?.unwrap_or(defaults.mem_max),
        mem_shares: shares("memShares")?,
    })
}

/// Allocation flags shared by `create` and `pool_config_set`.
fn allocation_flags(pool: &ResourcePool, creating: bool) -> String {
    let mut flags = Vec::new();

    if creating || pool.cpu_min > 0 {
        flags.push(format!("--cpu-min={}", pool.cpu_min));
    }
    flags.push(format!("--cpu-min-expandable={}", pool.cpu_min_expandable));
    if pool.cpu_max > 0 {
        flags.push(format!("--cpu-max={}", pool.cpu_max));
    }
    flags.push(format!("--cpu-shares={}", pool.cpu_shares));

    if creating || pool.mem_min > 0 {
        flags.push(format!("--mem-min={}", pool.mem_min));
    }
    flags.push(format!("--mem-min-expandable={}", pool.mem_min_expandable));
    if pool.mem_max > 0 {
        flags.push(format!("--mem-max={}", pool.mem_max));
    }
    flags.push(format!("--mem-shares={}", pool.mem_shares));

    flags.join(" ")
}

fn leaf_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Id of the pool whose leaf name matches the last segment of `name`.
pub async fn pool_id(host: &Host, name: &str) -> Result<Option<String>> {
    if name == ROOT_POOL_NAME || name == ROOT_POOL_HOST_NAME {
        return Ok(Some(ROOT_POOL_ID.to_string()));
    }

    let command = format!(
        "grep -A1 {} {} | grep -m 1 -o {}",
        quote(&format!("<name>{}</name>", leaf_name(name))),
        POOLS_XML,
        quote("objID.*objID")
    );
    let output = host.run(&command, "get resource pool id").await?.output;
    let id = output.replace("objID>", "").replace("</objID", "");
    let id = id.trim();

    Ok((!id.is_empty()).then(|| id.to_string()))
}

/// Slash separated path of a pool, `/` for the root pool.
pub async fn pool_name(host: &Host, id: &str) -> Result<String> {
    if id == ROOT_POOL_ID {
        return Ok(ROOT_POOL_NAME.to_string());
    }

    let command = format!(
        "grep -A1 {} {} | grep {}",
        quote(&format!("<objID>{}</objID>", id)),
        POOLS_XML,
        quote("<path>")
    );
    let path = host.run(&command, "get resource pool path").await?.output;
    if path.is_empty() {
        return Err(Error::NotFound(format!("resource pool {} not found", id)));
    }

    let mut names = Vec::new();
    for part in PATH_SEPARATORS.split(&path) {
        if matches!(part, "" | "path" | "host" | "user" | ROOT_POOL_ID) {
            continue;
        }
        let command = format!(
            "grep -B1 {} {} | grep -o {}",
            quote(&format!("<objID>{}</objID>", part)),
            POOLS_XML,
            quote("name.*name")
        );
        let output = host.run(&command, "get resource pool name").await?.output;
        let name = output.replace("name>", "").replace("</name", "");
        let name = name.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }

    Ok(names.join("/"))
}

pub async fn create(host: &Host, pool: &ResourcePool) -> Result<ResourcePool> {
    let (parent, leaf) = match pool.name.rsplit_once('/') {
        Some((parent, leaf)) if !parent.is_empty() => (parent, leaf),
        _ => (ROOT_POOL_HOST_NAME, pool.name.as_str()),
    };

    if let Some(id) = pool_id(host, leaf).await? {
        info!("adopting existing resource pool {} ({})", pool.name, id);
        return read(host, &id).await;
    }

    info!("🔧 creating resource pool {}", pool.name);

    let parent_id = pool_id(host, parent).await?.ok_or_else(|| {
        Error::NotFound(format!("parent resource pool {} not found", parent))
    })?;
    host.execute(
        &format!(
            "vim-cmd hostsvc/rsrc/create {} {} {}",
            allocation_flags(pool, true),
            quote(&parent_id),
            quote(leaf)
        ),
        "create resource pool",
    )
    .await
    .map_err(|e| Error::Hypervisor(format!("failed to create resource pool {}: {}", pool.name, e)))?;

    let id = pool_id(host, leaf).await?.ok_or_else(|| {
        Error::Hypervisor(format!("failed to resolve the id of resource pool {}", pool.name))
    })?;
    read(host, &id).await
}

pub async fn update(host: &Host, pool: &ResourcePool) -> Result<ResourcePool> {
    let id = quote(&pool.id);

    let current_name = pool_name(host, &pool.id).await?;
    if current_name != pool.name {
        info!("renaming resource pool {} to {}", current_name, pool.name);
        host.execute(
            &format!(
                "vim-cmd hostsvc/rsrc/rename {} {}",
                id,
                quote(leaf_name(&pool.name))
            ),
            "rename resource pool",
        )
        .await?;
    }

    host.execute(
        &format!(
            "vim-cmd hostsvc/rsrc/pool_config_set {} {}",
            allocation_flags(pool, false),
            id
        ),
        "update resource pool",
    )
    .await?;

    read(host, &pool.id).await
}

pub async fn read(host: &Host, id: &str) -> Result<ResourcePool> {
    let result = host
        .run(
            &format!("vim-cmd hostsvc/rsrc/pool_config_get {}", quote(id)),
            "get resource pool config",
        )
        .await?;
    if result.output.contains("deleted") {
        return Err(Error::NotFound(format!("resource pool {} not found", id)));
    }
    if !result.success() {
        return Err(Error::command(
            "get resource pool config",
            format!("vim-cmd hostsvc/rsrc/pool_config_get {}", id),
            result.output,
            result.status,
        ));
    }

    let mut pool = ResourcePool {
        id: id.to_string(),
        ..Default::default()
    };
    apply_pool_config(&result.output, &mut pool);
    pool.name = pool_name(host, id).await?;

    Ok(pool)
}

pub async fn delete(host: &Host, id: &str) -> Result<()> {
    if id == ROOT_POOL_ID {
        return Err(Error::InvalidArgument(
            "the root resource pool cannot be destroyed".to_string(),
        ));
    }

    info!("🗑️ deleting resource pool {}", id);
    host.execute(
        &format!("vim-cmd hostsvc/rsrc/destroy {}", quote(id)),
        "delete resource pool",
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{connection_info, ScriptedShell};
    use serde_json::json;
    use std::sync::Arc;

    fn host(shell: &Arc<ScriptedShell>) -> Host {
        Host::with_shell(connection_info(), shell.clone())
    }

    fn script_pool(shell: &ScriptedShell) {
        shell.on("<objID>pool7</objID>' /etc/vmware/hostd/pools.xml | grep '<path>'", "<path>host/user/pool1/pool7</path>");
        shell.on("<objID>pool1</objID>' /etc/vmware/hostd/pools.xml | grep -o", "<name>dev</name>");
        shell.on("<objID>pool7</objID>' /etc/vmware/hostd/pools.xml | grep -o", "<name>web</name>");
        shell.on("pool_config_get", "cpuAllocation = {\n reservation = 100,\n expandableReservation = true,\n limit = -1,\n level = \"high\"\n}");
    }

    #[test]
    fn test_parse() {
        let inputs = json!({ "name": "/dev/web", "cpuShares": "HIGH", "memMax": 4096 });
        let pool = parse("", inputs.as_object().unwrap()).unwrap();
        assert_eq!(pool.name, "dev/web");
        assert_eq!(pool.cpu_shares, Shares::High);
        assert_eq!(pool.mem_shares, Shares::Normal);
        assert_eq!(pool.cpu_min, 100);
        assert_eq!(pool.mem_max, 4096);

        let inputs = json!({ "name": "web", "memShares": "plenty" });
        assert!(parse("", inputs.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_allocation_flags() {
        let pool = ResourcePool {
            cpu_min: 0,
            mem_max: 2048,
            ..Default::default()
        };
        assert_eq!(
            allocation_flags(&pool, false),
            "--cpu-min-expandable=true --cpu-shares=normal --mem-min=200 --mem-min-expandable=true --mem-max=2048 --mem-shares=normal"
        );
        assert!(allocation_flags(&pool, true).starts_with("--cpu-min=0 "));
    }

    #[tokio::test]
    async fn test_pool_name_joins_path() {
        let shell = ScriptedShell::new();
        script_pool(&shell);
        assert_eq!(pool_name(&host(&shell), "pool7").await.unwrap(), "dev/web");
        assert_eq!(pool_name(&host(&shell), ROOT_POOL_ID).await.unwrap(), "/");
    }

    #[tokio::test]
    async fn test_create_adopts_existing_pool() {
        let shell = ScriptedShell::new();
        script_pool(&shell);
        shell.on("<name>web</name>", "objID>pool7</objID");
        let inputs = json!({ "name": "dev/web" });
        let pool = parse("", inputs.as_object().unwrap()).unwrap();

        let first = create(&host(&shell), &pool).await.unwrap();
        let second = create(&host(&shell), &pool).await.unwrap();
        assert_eq!(first.id, "pool7");
        assert_eq!(second.id, first.id);
        assert_eq!(first.name, "dev/web");
        assert_eq!(first.cpu_shares, Shares::High);
        assert_eq!(shell.count("hostsvc/rsrc/create"), 0);
    }

    #[tokio::test]
    async fn test_create_under_parent() {
        let shell = ScriptedShell::new();
        script_pool(&shell);
        shell.on("<name>dev</name>", "objID>pool1</objID");
        shell.once("<name>web</name>", "");
        shell.on("<name>web</name>", "objID>pool7</objID");
        let inputs = json!({ "name": "dev/web" });
        let pool = parse("", inputs.as_object().unwrap()).unwrap();

        let created = create(&host(&shell), &pool).await.unwrap();
        assert_eq!(created.id, "pool7");
        assert_eq!(
            shell.count("vim-cmd hostsvc/rsrc/create --cpu-min=100 --cpu-min-expandable=true --cpu-shares=normal --mem-min=200 --mem-min-expandable=true --mem-shares=normal pool1 web"),
            1
        );
    }

    #[tokio::test]
    async fn test_update_renames_only_on_change() {
        let shell = ScriptedShell::new();
        script_pool(&shell);

        let inputs = json!({ "name": "dev/web" });
        let pool = parse("pool7", inputs.as_object().unwrap()).unwrap();
        update(&host(&shell), &pool).await.unwrap();
        assert_eq!(shell.count("hostsvc/rsrc/rename"), 0);
        assert_eq!(
            shell.count("vim-cmd hostsvc/rsrc/pool_config_set --cpu-min=100 --cpu-min-expandable=true --cpu-shares=normal --mem-min=200 --mem-min-expandable=true --mem-shares=normal pool7"),
            1
        );

        let inputs = json!({ "name": "dev/api", "cpuMin": 0, "memMin": 0 });
        let pool = parse("pool7", inputs.as_object().unwrap()).unwrap();
        update(&host(&shell), &pool).await.unwrap();
        assert_eq!(shell.count("vim-cmd hostsvc/rsrc/rename pool7 api"), 1);
        assert_eq!(shell.count("hostsvc/rsrc/rename"), 1);
        assert_eq!(shell.count("pool_config_set"), 2);

        let last_set = shell
            .commands()
            .into_iter()
            .filter(|command| command.contains("pool_config_set"))
            .last()
            .unwrap();
        assert!(!last_set.contains("--cpu-min="));
        assert!(!last_set.contains("--mem-min="));
        assert!(last_set.contains("--cpu-shares=normal"));
    }

    #[tokio::test]
    async fn test_read_deleted_pool() {
        let shell = ScriptedShell::new();
        shell.on("pool_config_get", "vim.fault.NotFound: The object has already been deleted");
        assert!(read(&host(&shell), "pool9").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_root_pool_is_never_destroyed() {
        let shell = ScriptedShell::new();
        assert!(delete(&host(&shell), ROOT_POOL_ID).await.is_err());
        assert!(shell.commands().is_empty());
    }
}

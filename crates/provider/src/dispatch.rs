/// Token dispatch onto resource drivers
///
/// Resource tokens look like `esxi-native:index:VirtualSwitch`; function tokens
/// like `esxi-native:index:getVirtualMachine`.

use common::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::hypervisor::{pool, vm};
use crate::network::{portgroup, vswitch};
use crate::projection::{Project, PropertyMap};
use crate::properties::{Inputs, Properties};
use crate::session::Host;
use crate::storage::disk;
use crate::validation::{self, CheckFailure};

pub const TOKEN_PREFIX: &str = "esxi-native:index:";
pub const GET_VIRTUAL_MACHINE: &str = "esxi-native:index:getVirtualMachine";
pub const GET_VIRTUAL_MACHINE_BY_ID: &str = "esxi-native:index:getVirtualMachineById";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    PortGroup,
    ResourcePool,
    VirtualDisk,
    VirtualMachine,
    VirtualSwitch,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::PortGroup,
        ResourceKind::ResourcePool,
        ResourceKind::VirtualDisk,
        ResourceKind::VirtualMachine,
        ResourceKind::VirtualSwitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::PortGroup => "PortGroup",
            ResourceKind::ResourcePool => "ResourcePool",
            ResourceKind::VirtualDisk => "VirtualDisk",
            ResourceKind::VirtualMachine => "VirtualMachine",
            ResourceKind::VirtualSwitch => "VirtualSwitch",
        }
    }

    pub fn token(&self) -> String {
        format!("{}{}", TOKEN_PREFIX, self.as_str())
    }

    fn from_token(token: &str) -> Option<Self> {
        let name = token.strip_prefix(TOKEN_PREFIX)?;
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        Self::from_token(token)
            .ok_or_else(|| Error::UnknownOperation(format!("unknown operation '{}'", token)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "Create",
            Operation::Read => "Read",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
        })
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "read" => Ok(Operation::Read),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(Error::UnknownOperation(format!("unknown operation '{}'", s))),
        }
    }
}

/// Resource id plus its projected outputs. Delete yields an empty map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchResult {
    pub id: String,
    pub outputs: PropertyMap,
}

impl DispatchResult {
    fn projected<T: Project>(id: &str, entity: &T) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            outputs: entity.project(false)?,
        })
    }
}

pub struct Dispatcher {
    host: Host,
}

impl Dispatcher {
    pub fn new(host: Host) -> Self {
        Self { host }
    }

    pub async fn create(&self, token: &str, inputs: &Inputs) -> Result<DispatchResult> {
        self.call(token, Operation::Create, "", inputs).await
    }

    pub async fn read(&self, token: &str, id: &str, inputs: &Inputs) -> Result<DispatchResult> {
        self.call(token, Operation::Read, id, inputs).await
    }

    pub async fn update(&self, token: &str, id: &str, inputs: &Inputs) -> Result<DispatchResult> {
        self.call(token, Operation::Update, id, inputs).await
    }

    pub async fn delete(&self, token: &str, id: &str, inputs: &Inputs) -> Result<DispatchResult> {
        self.call(token, Operation::Delete, id, inputs).await
    }

    /// Validate `inputs` without touching the host.
    pub fn check(&self, token: &str, inputs: &Inputs) -> Result<Vec<CheckFailure>> {
        let kind: ResourceKind = token.parse()?;
        Ok(validation::check(kind, inputs))
    }

    /// Run a data-source function. Outputs keep the id.
    pub async fn invoke(&self, token: &str, inputs: &Inputs) -> Result<PropertyMap> {
        let props = Properties::new(inputs);
        debug!("invoking {}", token);

        let found = match token {
            GET_VIRTUAL_MACHINE => match (props.string("name"), props.string("id")) {
                (Some(name), _) => vm::get_by_name(&self.host, &name).await?,
                (None, Some(id)) => vm::get_by_id(&self.host, &id).await?,
                (None, None) => return Err(missing("name")),
            },
            GET_VIRTUAL_MACHINE_BY_ID => {
                let id = props.string("id").ok_or_else(|| missing("id"))?;
                vm::get_by_id(&self.host, &id).await?
            }
            _ => {
                return Err(Error::UnknownOperation(format!(
                    "unknown function '{}'",
                    token
                )))
            }
        };
        found.project(true)
    }

    /// Route `(token, operation)` to the driver of that resource kind.
    pub async fn call(
        &self,
        token: &str,
        operation: Operation,
        id: &str,
        inputs: &Inputs,
    ) -> Result<DispatchResult> {
        let kind = ResourceKind::from_token(token).ok_or_else(|| {
            Error::UnknownOperation(format!("unknown operation '{}:{}'", token, operation))
        })?;
        if operation != Operation::Create && id.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} of {} requires a resource id",
                operation, kind
            )));
        }

        info!("{} {} {}", operation, kind.as_str(), id);
        let host = &self.host;

        match (kind, operation) {
            (ResourceKind::VirtualSwitch, Operation::Create) => {
                let created = vswitch::create(host, &vswitch::parse(id, inputs)?).await?;
                DispatchResult::projected(&created.id, &created)
            }
            (ResourceKind::VirtualSwitch, Operation::Update) => {
                let updated = vswitch::update(host, &vswitch::parse(id, inputs)?).await?;
                DispatchResult::projected(&updated.id, &updated)
            }
            (ResourceKind::VirtualSwitch, Operation::Read) => {
                let found = vswitch::read(host, id).await?;
                DispatchResult::projected(&found.id, &found)
            }
            (ResourceKind::VirtualSwitch, Operation::Delete) => {
                vswitch::delete(host, id).await?;
                Ok(DispatchResult::default())
            }

            (ResourceKind::PortGroup, Operation::Create) => {
                let created = portgroup::create(host, &portgroup::parse(id, inputs)?).await?;
                DispatchResult::projected(&created.id, &created)
            }
            (ResourceKind::PortGroup, Operation::Update) => {
                let updated = portgroup::update(host, &portgroup::parse(id, inputs)?).await?;
                DispatchResult::projected(&updated.id, &updated)
            }
            (ResourceKind::PortGroup, Operation::Read) => {
                let found = portgroup::read(host, id).await?;
                DispatchResult::projected(&found.id, &found)
            }
            (ResourceKind::PortGroup, Operation::Delete) => {
                portgroup::delete(host, id).await?;
                Ok(DispatchResult::default())
            }

            (ResourceKind::ResourcePool, Operation::Create) => {
                let created = pool::create(host, &pool::parse(id, inputs)?).await?;
                DispatchResult::projected(&created.id, &created)
            }
            (ResourceKind::ResourcePool, Operation::Update) => {
                let updated = pool::update(host, &pool::parse(id, inputs)?).await?;
                DispatchResult::projected(&updated.id, &updated)
            }
            (ResourceKind::ResourcePool, Operation::Read) => {
                let found = pool::read(host, id).await?;
                DispatchResult::projected(&found.id, &found)
            }
            (ResourceKind::ResourcePool, Operation::Delete) => {
                pool::delete(host, id).await?;
                Ok(DispatchResult::default())
            }

            (ResourceKind::VirtualDisk, Operation::Create) => {
                let created = disk::create(host, &disk::parse(id, inputs)?).await?;
                DispatchResult::projected(&created.id, &created)
            }
            (ResourceKind::VirtualDisk, Operation::Update) => {
                let updated = disk::update(host, &disk::parse(id, inputs)?).await?;
                DispatchResult::projected(&updated.id, &updated)
            }
            (ResourceKind::VirtualDisk, Operation::Read) => {
                let found = disk::read(host, id).await?;
                DispatchResult::projected(&found.id, &found)
            }
            (ResourceKind::VirtualDisk, Operation::Delete) => {
                disk::delete(host, id).await?;
                Ok(DispatchResult::default())
            }

            (ResourceKind::VirtualMachine, Operation::Create) => {
                let desired = vm::parse(id, inputs, host.connection())?;
                let created = vm::create(host, &desired).await?;
                DispatchResult::projected(&created.id, &created)
            }
            (ResourceKind::VirtualMachine, Operation::Update) => {
                let desired = vm::parse(id, inputs, host.connection())?;
                let updated = vm::update(host, &desired).await?;
                DispatchResult::projected(&updated.id, &updated)
            }
            (ResourceKind::VirtualMachine, Operation::Read) => {
                let startup_timeout = Properties::new(inputs)
                    .number_u32("startupTimeout")?
                    .unwrap_or_default();
                let found = vm::read(host, id, startup_timeout).await?;
                DispatchResult::projected(&found.id, &found)
            }
            (ResourceKind::VirtualMachine, Operation::Delete) => {
                vm::delete(host, id).await?;
                Ok(DispatchResult::default())
            }
        }
    }
}

fn missing(key: &str) -> Error {
    Error::InvalidArgument(format!("missing required property '{}'", key))
}

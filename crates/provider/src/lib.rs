/// esxi-native provider core
///
/// Manages virtual switches, port groups, resource pools, virtual disks and
/// virtual machines on a standalone ESXi host over SSH.

pub mod config;
pub mod dispatch;
pub mod hypervisor;
pub mod naming;
pub mod network;
pub mod parsers;
pub mod projection;
pub mod properties;
pub mod session;
pub mod storage;
pub mod validation;

pub use config::ProviderConfig;
pub use dispatch::{DispatchResult, Dispatcher, Operation, ResourceKind};
pub use properties::Inputs;
pub use session::Host;
pub use validation::CheckFailure;

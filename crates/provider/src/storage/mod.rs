/// Storage
///
/// Standalone virtual disks on VMFS datastores.

pub mod disk;

pub use disk::{grow_virtual_disk, validate_disk_store};

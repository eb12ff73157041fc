/// Networking
///
/// Standard virtual switches and their port groups, driven through `esxcli`.

pub mod portgroup;
pub mod vswitch;

/// Hypervisor
///
/// Virtual machines and the resource pools they run in, driven through `vim-cmd`,
/// `vmkfstools` and `ovftool`.

pub mod ovf;
pub mod pool;
pub mod power;
pub mod vm;
pub mod vmx;

/// Text protocol parsers and encoders
///
/// Stateless helpers that turn host command output into typed values and back.

pub mod listing;
pub mod security;
pub mod template;
pub mod vmx;

pub use security::PortGroupSecurityPolicy;
pub use template::render_template;
pub use vmx::Vmx;

/// Default resource names
///
/// A resource without an explicit `name` keeps the one it was created with, or gets
/// `{base}-{random hex}` sized to fit the kind's length bounds.

use common::utils::random_hex;
use common::{Error, Result};

use crate::dispatch::ResourceKind;
use crate::properties::{Inputs, Properties};

const RANDOM_SUFFIX_LENGTH: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameRules {
    pub min_length: usize,
    pub max_length: usize,
}

impl ResourceKind {
    pub fn name_rules(&self) -> NameRules {
        let min_length = match self {
            ResourceKind::ResourcePool | ResourceKind::VirtualMachine => 5,
            ResourceKind::PortGroup | ResourceKind::VirtualDisk | ResourceKind::VirtualSwitch => 3,
        };
        NameRules {
            min_length,
            max_length: 250,
        }
    }
}

fn random_suffix(length: usize) -> String {
    let mut suffix = String::with_capacity(length);
    while suffix.len() < length {
        suffix.push_str(&random_hex(length - suffix.len()));
    }
    suffix
}

/// Generate `{base}-{suffix}` within the length bounds of `kind`.
pub fn auto_name(kind: ResourceKind, base: &str) -> Result<String> {
    let rules = kind.name_rules();
    let prefix = format!("{}-", base);

    let mut random_length = RANDOM_SUFFIX_LENGTH;
    if prefix.len() + random_length < rules.min_length {
        random_length = rules.min_length - prefix.len();
    }

    let left = rules.max_length.saturating_sub(prefix.len());
    if left == 0 {
        return Err(Error::InvalidArgument(format!(
            "failed to auto-generate value for \"name\". Prefix: \"{}\" is too large to fix max length constraint of {}",
            prefix, rules.max_length
        )));
    }
    random_length = random_length.min(left);

    Ok(format!("{}{}", prefix, random_suffix(random_length)))
}

/// Name to use for a resource: the requested one, then the one it already has,
/// then a generated one.
pub fn resolve_name(kind: ResourceKind, news: &Inputs, olds: &Inputs, base: &str) -> Result<String> {
    if let Some(name) = Properties::new(news).string("name").filter(|n| !n.is_empty()) {
        return Ok(name);
    }
    if let Some(name) = Properties::new(olds).string("name").filter(|n| !n.is_empty()) {
        return Ok(name);
    }
    auto_name(kind, base)
}

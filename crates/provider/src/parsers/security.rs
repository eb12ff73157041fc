/// CSV output of `esxcli --formatter=csv ... portgroup policy security get`.

use common::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PortGroupSecurityPolicy {
    #[serde(rename = "AllowForgedTransmits")]
    pub allow_forged_transmits: bool,
    #[serde(rename = "AllowMACAddressChange")]
    pub allow_mac_address_change: bool,
    #[serde(rename = "AllowPromiscuous")]
    pub allow_promiscuous: bool,
}

impl PortGroupSecurityPolicy {
    /// Exactly one data row is expected.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let policies = reader
            .deserialize::<Self>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                Error::Parse(format!(
                    "failed to parse the port group security policy: {} ({})",
                    text, e
                ))
            })?;

        match policies.as_slice() {
            [policy] => Ok(*policy),
            _ => Err(Error::Parse(format!(
                "expected one port group security policy, found {}: {}",
                policies.len(),
                text
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_row() {
        let text = "AllowForgedTransmits,AllowMACAddressChange,AllowPromiscuous,\nfalse,true,false,\n";
        let policy = PortGroupSecurityPolicy::parse(text).unwrap();
        assert!(!policy.allow_forged_transmits);
        assert!(policy.allow_mac_address_change);
        assert!(!policy.allow_promiscuous);
    }

    #[test]
    fn test_rejects_wrong_row_count() {
        let header = "AllowForgedTransmits,AllowMACAddressChange,AllowPromiscuous\n";
        assert!(PortGroupSecurityPolicy::parse(header).is_err());

        let two = format!("{}true,true,true\nfalse,false,false\n", header);
        assert!(PortGroupSecurityPolicy::parse(&two).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(PortGroupSecurityPolicy::parse("AllowForgedTransmits\nmaybe").is_err());
    }
}

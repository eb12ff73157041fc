/// vmx configuration-line format: `key = "value"`, one per line.

use std::fmt;

/// Ordered key/value view of a vmx file.
///
/// A repeated key keeps the position of its first occurrence and the value of its last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vmx {
    entries: Vec<(String, String)>,
}

impl Vmx {
    pub fn parse(text: &str) -> Self {
        let mut vmx = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            vmx.set(key, unquote(value.trim()));
        }
        vmx
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replace in place, or append when the key is new.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Drop every key starting with `prefix`; returns how many were removed.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.starts_with(prefix))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Vmx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{} = \"{}\"", key, value)?;
        }
        Ok(())
    }
}

fn unquote(value: &str) -> String {
    let value = value
        .strip_prefix("\\\"")
        .and_then(|v| v.strip_suffix("\\\""))
        .unwrap_or(value);
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// Quotes are stored as `|22` inside vmx values.
pub fn encode_notes(notes: &str) -> String {
    notes.replace('"', "|22")
}

pub fn decode_notes(notes: &str) -> String {
    notes.replace("|22", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_encode() {
        let text = "config.version = \"8\"\n\nmemSize = \"512\"\n# comment\nguestOS = \"centos-64\"\n";
        let vmx = Vmx::parse(text);
        assert_eq!(vmx.len(), 3);
        assert_eq!(vmx.get("memSize"), Some("512"));
        assert_eq!(
            vmx.encode(),
            "config.version = \"8\"\nmemSize = \"512\"\nguestOS = \"centos-64\""
        );
    }

    #[test]
    fn test_duplicate_keys_last_wins_first_position() {
        let vmx = Vmx::parse("a = \"1\"\nb = \"2\"\na = \"3\"");
        let keys: Vec<_> = vmx.iter().collect();
        assert_eq!(keys, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_set_replaces_in_place_or_appends() {
        let mut vmx = Vmx::parse("a = \"1\"\nb = \"2\"");
        vmx.set("a", "9");
        vmx.set("c", "3");
        assert_eq!(vmx.encode(), "a = \"9\"\nb = \"2\"\nc = \"3\"");
    }

    #[test]
    fn test_remove_prefix() {
        let mut vmx = Vmx::parse(
            "scsi0:1.fileName = \"a.vmdk\"\nscsi0:1.present = \"TRUE\"\nscsi0:10.present = \"TRUE\"",
        );
        assert_eq!(vmx.remove_prefix("scsi0:1."), 2);
        assert!(vmx.contains_key("scsi0:10.present"));
    }

    #[test]
    fn test_value_with_equals_sign() {
        let vmx = Vmx::parse("guestinfo.userdata = \"a=b\"");
        assert_eq!(vmx.get("guestinfo.userdata"), Some("a=b"));
    }

    #[test]
    fn test_notes_round_trip() {
        let notes = "say \"hello\"";
        let encoded = encode_notes(notes);
        assert_eq!(encoded, "say |22hello|22");
        assert_eq!(decode_notes(&encoded), notes);
    }
}

//! Edge alias derivation.
//!
//! Every bridged device is registered with the Edge under an alias rendered
//! from a template such as `gw-{{RELAY_ID}}-{{DEVJS_ID}}`. Edge endpoint
//! names are capped at [`MAX_ALIAS_LEN`]; when a long device id pushes the
//! alias over the cap, the device id is shortened and tagged with a hash of
//! the full id so the rendered prefix survives and distinct ids stay
//! distinct.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum length of an Edge alias.
pub const MAX_ALIAS_LEN: usize = 64;

/// Template used when none is configured or the configured one is invalid.
pub const DEFAULT_ENDPOINT_TEMPLATE: &str = "gw-{{RELAY_ID}}-{{DEVJS_ID}}";

const RELAY_PLACEHOLDER: &str = "{{RELAY_ID}}";
const DEVICE_PLACEHOLDER: &str = "{{DEVJS_ID}}";
const HASH_TAG_LEN: usize = 8;

/// A validated alias template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTemplate {
    template: String,
}

impl AliasTemplate {
    /// Validate a template string.
    ///
    /// The template must contain `{{DEVJS_ID}}` and may contain
    /// `{{RELAY_ID}}`; any other `{{...}}` placeholder is rejected.
    pub fn parse(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(DEVICE_PLACEHOLDER) {
            return Err(Error::Validation(format!(
                "alias template '{}' has no {} placeholder",
                template, DEVICE_PLACEHOLDER
            )));
        }
        let stripped = template
            .replace(RELAY_PLACEHOLDER, "")
            .replace(DEVICE_PLACEHOLDER, "");
        if stripped.contains("{{") || stripped.contains("}}") {
            return Err(Error::Validation(format!(
                "alias template '{}' has an unknown placeholder",
                template
            )));
        }
        Ok(Self { template })
    }

    /// The raw template text.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Render the alias for a device.
    ///
    /// The result is never longer than [`MAX_ALIAS_LEN`] bytes.
    pub fn render(&self, relay_id: &str, device_id: &str) -> String {
        let (head, tail) = self
            .template
            .split_once(DEVICE_PLACEHOLDER)
            .unwrap_or((self.template.as_str(), ""));
        let prefix = head.replace(RELAY_PLACEHOLDER, relay_id);
        let suffix = tail
            .replace(RELAY_PLACEHOLDER, relay_id)
            .replace(DEVICE_PLACEHOLDER, device_id);

        let full = format!("{}{}{}", prefix, device_id, suffix);
        if full.len() <= MAX_ALIAS_LEN {
            return full;
        }

        // room left for the device id after the fixed parts and "-<tag>"
        let budget = MAX_ALIAS_LEN
            .checked_sub(prefix.len() + suffix.len() + 1 + HASH_TAG_LEN)
            .filter(|budget| *budget > 0);

        match budget {
            Some(budget) => format!(
                "{}{}-{}{}",
                prefix,
                truncate_at_boundary(device_id, budget),
                hash_tag(device_id),
                suffix
            ),
            None => truncate_at_boundary(&full, MAX_ALIAS_LEN).to_string(),
        }
    }
}

impl Default for AliasTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
        }
    }
}

impl fmt::Display for AliasTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn hash_tag(device_id: &str) -> String {
    let digest = Sha256::digest(device_id.as_bytes());
    let mut tag = hex::encode(digest);
    tag.truncate(HASH_TAG_LEN);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_render() {
        let alias = AliasTemplate::default().render("WWRL000001", "ZigbeeLight1");
        assert_eq!(alias, "gw-WWRL000001-ZigbeeLight1");
    }

    #[test]
    fn test_long_device_id_is_truncated_behind_prefix() {
        let device_id = "Z".repeat(120);
        let alias = AliasTemplate::default().render("WWRL000001", &device_id);

        assert!(alias.len() <= MAX_ALIAS_LEN);
        assert!(alias.starts_with("gw-WWRL000001-ZZZ"));
        // deterministic
        assert_eq!(alias, AliasTemplate::default().render("WWRL000001", &device_id));
    }

    #[test]
    fn test_truncated_aliases_stay_distinct() {
        let template = AliasTemplate::default();
        let a = template.render("relay", &format!("{}A", "x".repeat(80)));
        let b = template.render("relay", &format!("{}B", "x".repeat(80)));
        assert_ne!(a, b);
        assert_eq!(a.len(), MAX_ALIAS_LEN);
    }

    #[test]
    fn test_oversized_prefix_falls_back_to_hard_cut() {
        let relay = "R".repeat(70);
        let alias = AliasTemplate::default().render(&relay, "dev");
        assert_eq!(alias.len(), MAX_ALIAS_LEN);
        assert!(alias.starts_with("gw-RRR"));
    }

    #[test]
    fn test_template_validation() {
        assert!(AliasTemplate::parse("edge-{{DEVJS_ID}}").is_ok());
        assert!(AliasTemplate::parse("gw-{{RELAY_ID}}").is_err());
        assert!(AliasTemplate::parse("gw-{{SITE}}-{{DEVJS_ID}}").is_err());
    }

    #[test]
    fn test_suffix_template() {
        let template = AliasTemplate::parse("{{DEVJS_ID}}@{{RELAY_ID}}").unwrap();
        assert_eq!(template.render("r1", "lamp"), "lamp@r1");
    }
}

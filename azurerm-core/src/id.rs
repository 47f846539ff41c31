//! ARM resource identifiers
//!
//! Azure identifies every resource by a path-structured string:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{type}/{name}...]
//! ```
//!
//! [`ResourceId`] parses and renders the general form, [`ChildIdFormat`]
//! binds it to the (resource group, parent, child) key of a child resource.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::error::{ErrorKind, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("ID {0:?} must start with '/'")]
    MissingLeadingSlash(String),

    #[error("ID {0:?} contains an empty segment")]
    EmptySegment(String),

    #[error("ID {0:?} has an odd number of segments")]
    OddSegments(String),

    #[error("ID {id:?} is missing the {segment:?} segment")]
    MissingSegment { id: String, segment: &'static str },

    #[error("ID {id:?} contains the key {key:?} more than once")]
    DuplicateKey { id: String, key: String },

    #[error("ID {id:?} does not match the expected format {expected}")]
    UnexpectedFormat { id: String, expected: String },
}

impl From<IdError> for ProviderError {
    fn from(err: IdError) -> Self {
        ProviderError::new(ErrorKind::InvalidId, "error parsing Azure Resource ID").with_cause(err)
    }
}

/// A parsed ARM resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    /// Resource provider namespace (e.g., "Microsoft.ServiceBus")
    pub provider: Option<String>,
    /// Remaining key/value segments in order
    path: Vec<(String, String)>,
}

impl ResourceId {
    pub fn new(subscription_id: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            provider: None,
            path: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_segment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.push((key.into(), value.into()));
        self
    }

    pub fn parse(id: &str) -> Result<Self, IdError> {
        let rest = id
            .strip_prefix('/')
            .ok_or_else(|| IdError::MissingLeadingSlash(id.to_string()))?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(IdError::EmptySegment(id.to_string()));
        }
        if segments.len() % 2 != 0 {
            return Err(IdError::OddSegments(id.to_string()));
        }

        let mut subscription_id = None;
        let mut resource_group = None;
        let mut provider = None;
        let mut path: Vec<(String, String)> = Vec::new();

        for pair in segments.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if subscription_id.is_none() {
                if !key.eq_ignore_ascii_case("subscriptions") {
                    return Err(IdError::MissingSegment {
                        id: id.to_string(),
                        segment: "subscriptions",
                    });
                }
                subscription_id = Some(value.to_string());
            } else if resource_group.is_none() {
                if !key.eq_ignore_ascii_case("resourceGroups") {
                    return Err(IdError::MissingSegment {
                        id: id.to_string(),
                        segment: "resourceGroups",
                    });
                }
                resource_group = Some(value.to_string());
            } else if provider.is_none() && path.is_empty() && key.eq_ignore_ascii_case("providers")
            {
                provider = Some(value.to_string());
            } else {
                if path.iter().any(|(k, _)| k == key) {
                    return Err(IdError::DuplicateKey {
                        id: id.to_string(),
                        key: key.to_string(),
                    });
                }
                path.push((key.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            subscription_id: subscription_id.ok_or(IdError::MissingSegment {
                id: id.to_string(),
                segment: "subscriptions",
            })?,
            resource_group: resource_group.ok_or(IdError::MissingSegment {
                id: id.to_string(),
                segment: "resourceGroups",
            })?,
            provider,
            path,
        })
    }

    /// Value of a path segment, matching the key case-insensitively
    pub fn path_value(&self, key: &str) -> Option<&str> {
        self.path
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &[(String, String)] {
        &self.path
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )?;
        if let Some(ref provider) = self.provider {
            write!(f, "/providers/{}", provider)?;
        }
        for (key, value) in &self.path {
            write!(f, "/{}/{}", key, value)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Composite key of a child resource living under a parent resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildKey {
    pub resource_group: String,
    pub parent_name: String,
    pub child_name: String,
}

impl ChildKey {
    pub fn new(
        resource_group: impl Into<String>,
        parent_name: impl Into<String>,
        child_name: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            parent_name: parent_name.into(),
            child_name: child_name.into(),
        }
    }
}

/// Fixed identifier layout for one child resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildIdFormat {
    /// e.g., "Microsoft.Web"
    pub provider: &'static str,
    /// e.g., "sites"
    pub parent_segment: &'static str,
    /// e.g., "siteextensions"
    pub child_segment: &'static str,
}

impl ChildIdFormat {
    pub const fn new(
        provider: &'static str,
        parent_segment: &'static str,
        child_segment: &'static str,
    ) -> Self {
        Self {
            provider,
            parent_segment,
            child_segment,
        }
    }

    pub fn resource_id(&self, subscription_id: &str, key: &ChildKey) -> ResourceId {
        ResourceId::new(subscription_id, &key.resource_group)
            .with_provider(self.provider)
            .with_segment(self.parent_segment, &key.parent_name)
            .with_segment(self.child_segment, &key.child_name)
    }

    pub fn format(&self, subscription_id: &str, key: &ChildKey) -> String {
        self.resource_id(subscription_id, key).to_string()
    }

    /// Relative path of the parent resource (without the subscription prefix)
    pub fn parent_path(&self, key: &ChildKey) -> String {
        format!(
            "/resourceGroups/{}/providers/{}/{}/{}",
            key.resource_group, self.provider, self.parent_segment, key.parent_name
        )
    }

    pub fn parse(&self, id: &str) -> Result<ChildKey, IdError> {
        let parsed = ResourceId::parse(id)?;
        let matches = parsed
            .provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(self.provider))
            && parsed.path.len() == 2
            && parsed.path[0].0.eq_ignore_ascii_case(self.parent_segment)
            && parsed.path[1].0.eq_ignore_ascii_case(self.child_segment);
        if !matches {
            return Err(IdError::UnexpectedFormat {
                id: id.to_string(),
                expected: self.to_string(),
            });
        }

        let ResourceId {
            resource_group,
            mut path,
            ..
        } = parsed;
        let (_, child_name) = path.pop().unwrap_or_default();
        let (_, parent_name) = path.pop().unwrap_or_default();
        Ok(ChildKey {
            resource_group,
            parent_name,
            child_name,
        })
    }
}

impl fmt::Display for ChildIdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{{subscriptionId}}/resourceGroups/{{resourceGroupName}}/providers/{}/{}/{{{}}}/{}/{{name}}",
            self.provider, self.parent_segment, self.parent_segment, self.child_segment
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENSION: ChildIdFormat = ChildIdFormat::new("Microsoft.Web", "sites", "siteextensions");

    #[test]
    fn parse_full_id() {
        let id = ResourceId::parse(
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.ServiceBus/namespaces/ns1/disasterRecoveryConfigs/dr1",
        )
        .unwrap();

        assert_eq!(id.subscription_id, "0000");
        assert_eq!(id.resource_group, "rg1");
        assert_eq!(id.provider.as_deref(), Some("Microsoft.ServiceBus"));
        assert_eq!(id.path_value("namespaces"), Some("ns1"));
        assert_eq!(id.path_value("disasterrecoveryconfigs"), Some("dr1"));
        assert_eq!(id.path_value("queues"), None);
    }

    #[test]
    fn resource_group_id_has_no_provider() {
        let id = ResourceId::parse("/subscriptions/0000/resourcegroups/rg1").unwrap();
        assert_eq!(id.resource_group, "rg1");
        assert!(id.provider.is_none());
        assert_eq!(id.to_string(), "/subscriptions/0000/resourceGroups/rg1");
    }

    #[test]
    fn display_round_trips() {
        let raw = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Web/sites/web/siteextensions/ext";
        let id = ResourceId::parse(raw).unwrap();
        assert_eq!(id.to_string(), raw);
        assert_eq!(ResourceId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(
            ResourceId::parse("subscriptions/0000/resourceGroups/rg"),
            Err(IdError::MissingLeadingSlash(_))
        ));
        assert!(matches!(
            ResourceId::parse("/subscriptions/0000/resourceGroups"),
            Err(IdError::OddSegments(_))
        ));
        assert!(matches!(
            ResourceId::parse("/subscriptions//resourceGroups/rg"),
            Err(IdError::EmptySegment(_))
        ));
        assert!(matches!(
            ResourceId::parse("/tenants/0000/resourceGroups/rg"),
            Err(IdError::MissingSegment { segment: "subscriptions", .. })
        ));
        assert!(matches!(
            ResourceId::parse("/subscriptions/0000"),
            Err(IdError::MissingSegment { segment: "resourceGroups", .. })
        ));
        assert!(matches!(
            ResourceId::parse("/subscriptions/0/resourceGroups/rg/providers/P/sites/a/sites/b"),
            Err(IdError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn child_key_round_trips() {
        let keys = [
            ChildKey::new("rg1", "web", "ext"),
            ChildKey::new("my-rg.prod", "app(1)", "Microsoft.AspNetCore.AzureAppServices.SiteExtension"),
            ChildKey::new("RG", "sites", "siteextensions"),
        ];
        for key in keys {
            let id = EXTENSION.format("sub", &key);
            assert_eq!(EXTENSION.parse(&id).unwrap(), key, "{}", id);
        }
    }

    #[test]
    fn child_format_rejects_other_types() {
        let id = "/subscriptions/0/resourceGroups/rg/providers/Microsoft.ServiceBus/namespaces/ns/disasterRecoveryConfigs/dr";
        assert!(matches!(
            EXTENSION.parse(id),
            Err(IdError::UnexpectedFormat { .. })
        ));

        let too_short = "/subscriptions/0/resourceGroups/rg/providers/Microsoft.Web/sites/web";
        assert!(EXTENSION.parse(too_short).is_err());
    }

    #[test]
    fn parent_paths() {
        let key = ChildKey::new("rg", "web", "ext");
        assert_eq!(
            EXTENSION.parent_path(&key),
            "/resourceGroups/rg/providers/Microsoft.Web/sites/web"
        );
    }
}

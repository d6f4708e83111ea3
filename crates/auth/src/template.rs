use core::str::FromStr;
use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability template code.
///
/// Codes are modeled as opaque strings (e.g. "manage_category",
/// "manage_users"). The meaning of a code is decided by the component that
/// requires it; this layer only matches codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateCode(Cow<'static, str>);

impl TemplateCode {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TemplateCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the resource a grant is scoped to (e.g. a material category).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl core::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for ResourceId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for ResourceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// A capability assignment granted to a user.
///
/// A grant with `resource_id == None` is **global** for its code; with a
/// concrete `resource_id` it is scoped to that single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateGrant {
    pub code: TemplateCode,
    pub resource_type: Option<String>,
    pub resource_id: Option<ResourceId>,
}

impl TemplateGrant {
    /// Global grant for `code`.
    pub fn global(code: impl Into<TemplateCode>) -> Self {
        Self {
            code: code.into(),
            resource_type: None,
            resource_id: None,
        }
    }

    /// Grant for `code` scoped to one resource.
    pub fn scoped(
        code: impl Into<TemplateCode>,
        resource_type: impl Into<String>,
        resource_id: ResourceId,
    ) -> Self {
        Self {
            code: code.into(),
            resource_type: Some(resource_type.into()),
            resource_id: Some(resource_id),
        }
    }

    pub fn is_global(&self) -> bool {
        self.resource_id.is_none()
    }
}

impl From<&'static str> for TemplateCode {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TemplateCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

//! Type information for the resource kinds a store serves.
use crate::metadata::TypeMeta;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Failed to parse a `group/version` pair
#[derive(Debug, Error)]
#[error("failed to parse group version: {0}")]
pub struct ParseGroupVersionError(pub String);

/// Whether a kind lives in a namespace or at cluster scope
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Objects exist once per cluster, with an empty namespace
    Cluster,
    /// Objects are owned by a namespace
    Namespaced,
}

impl Scope {
    /// Whether objects of this scope carry a namespace
    pub fn is_namespaced(&self) -> bool {
        matches!(self, Scope::Namespaced)
    }
}

/// Core information about a served API resource.
///
/// This is the per-kind capability descriptor the storage engine is handed;
/// it never inspects payloads beyond what this declares.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiResource {
    /// Resource group, empty for the core group
    pub group: String,
    /// Version within the group
    pub version: String,
    /// Singular PascalCase name of the kind
    pub kind: String,
    /// Plural name of the resource
    pub plural: String,
    /// Namespace scope of the kind
    pub scope: Scope,
}

impl ApiResource {
    /// Construct a namespaced resource from explicit parts
    pub fn namespaced(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: plural.into(),
            scope: Scope::Namespaced,
        }
    }

    /// Construct a cluster-scoped resource from explicit parts
    pub fn cluster(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            scope: Scope::Cluster,
            ..Self::namespaced(group, version, kind, plural)
        }
    }

    /// Generate the apiVersion string used in an object's type fields
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Whether objects of this kind carry a namespace
    pub fn is_namespaced(&self) -> bool {
        self.scope.is_namespaced()
    }

    /// Whether a [`TypeMeta`] addresses this resource.
    ///
    /// Fails when the apiVersion does not parse as a `group/version` pair.
    pub fn accepts(&self, types: &TypeMeta) -> Result<bool, ParseGroupVersionError> {
        let gv = GroupVersion::from_str(&types.api_version)?;
        Ok(gv.group == self.group && gv.version == self.version && types.kind == self.kind)
    }
}

/// A parsed `group/version` pair (`v1` implies the core group)
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    /// API group
    pub group: String,
    /// Version
    pub version: String,
}

impl FromStr for GroupVersion {
    type Err = ParseGroupVersionError;

    fn from_str(gv: &str) -> Result<Self, Self::Err> {
        let gvsplit = gv.splitn(2, '/').collect::<Vec<_>>();
        let (group, version) = match *gvsplit.as_slice() {
            [g, v] => (g.to_string(), v.to_string()), // standard case
            [v] => (String::new(), v.to_string()),    // core group case
            _ => return Err(ParseGroupVersionError(gv.into())),
        };
        Ok(Self { group, version })
    }
}

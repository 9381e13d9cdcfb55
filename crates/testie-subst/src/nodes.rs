//! Node lookup for interface references
//!
//! `${role:index:attr}` placeholders name an attribute of one network
//! interface of the node playing `role`. The executor that actually owns the
//! cluster implements [`NodeResolver`]; [`StaticNodes`] is a plain table
//! loaded from run settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role used when a reference names no role, and the fallback node role
pub const DEFAULT_ROLE: &str = "default";

/// Attributes of one interface (`ip`, `mac`, `ifname`, ...)
pub type Interface = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn interface_at(&self, index: usize) -> Option<&Interface> {
        self.interfaces.get(index)
    }
}

/// Maps a role name to the node playing it
pub trait NodeResolver: Send + Sync {
    fn resolve(&self, role: &str) -> Option<&Node>;
}

/// Role → node table. Unknown roles fall back to the `default` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticNodes {
    nodes: BTreeMap<String, Node>,
}

impl StaticNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: impl Into<String>, node: Node) {
        self.nodes.insert(role.into(), node);
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeResolver for StaticNodes {
    fn resolve(&self, role: &str) -> Option<&Node> {
        self.nodes
            .get(role)
            .or_else(|| self.nodes.get(DEFAULT_ROLE))
    }
}

/// Resolve the role written in a reference.
///
/// An empty role or `self` means the caller's own role (or `default`); the
/// result is then passed through the testie's `default_role_map`.
pub fn resolve_role<'a>(
    role: &'a str,
    self_role: Option<&'a str>,
    role_map: &'a BTreeMap<String, String>,
) -> &'a str {
    let role = if role.is_empty() || role == "self" {
        self_role.unwrap_or(DEFAULT_ROLE)
    } else {
        role
    };
    role_map.get(role).map(String::as_str).unwrap_or(role)
}

use crate::error::CoreError;
use routeconv_abstract::NodeHandle;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// One side of an installed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LinkEndpoint {
    pub node: NodeHandle,
    pub interface: u32,
}

/// Both sides of an installed link, oriented as they were looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LinkRecord {
    pub a: LinkEndpoint,
    pub b: LinkEndpoint,
}

impl LinkRecord {
    #[must_use = "function does not modify the current value"]
    pub fn reversed(self) -> Self {
        Self {
            a: self.b,
            b: self.a,
        }
    }
}

/// Maps an ordered node pair to the interface each node uses for their link.
///
/// Registering `(a, b)` installs both directions, so `lookup(b, a)` resolves
/// to the same link with its endpoints swapped. The registry is filled while
/// the topology is built and only read afterwards.
#[derive(Debug, Default, Clone)]
pub struct LinkRegistry {
    interfaces: HashMap<(NodeHandle, NodeHandle), u32>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_link(
        &mut self,
        a: NodeHandle,
        b: NodeHandle,
        interface_a: u32,
        interface_b: u32,
    ) -> Result<(), CoreError> {
        if a == b {
            return Err(CoreError::SelfLink { node: a });
        }

        let previous_a = self.interfaces.insert((a, b), interface_a);
        let previous_b = self.interfaces.insert((b, a), interface_b);
        if previous_a.is_some() || previous_b.is_some() {
            warn!(%a, %b, "link registered twice, keeping the latest interfaces");
        }
        Ok(())
    }

    /// Resolve the link between `a` and `b`.
    ///
    /// Fails with [`CoreError::UnregisteredLink`] when the pair was never
    /// registered.
    pub fn lookup(&self, a: NodeHandle, b: NodeHandle) -> Result<LinkRecord, CoreError> {
        let unregistered = || CoreError::UnregisteredLink { a, b };
        let interface_a = *self.interfaces.get(&(a, b)).ok_or_else(unregistered)?;
        let interface_b = *self.interfaces.get(&(b, a)).ok_or_else(unregistered)?;

        Ok(LinkRecord {
            a: LinkEndpoint {
                node: a,
                interface: interface_a,
            },
            b: LinkEndpoint {
                node: b,
                interface: interface_b,
            },
        })
    }

    pub fn contains(&self, a: NodeHandle, b: NodeHandle) -> bool {
        self.interfaces.contains_key(&(a, b))
    }

    /// Number of registered links.
    pub fn len(&self) -> usize {
        self.interfaces.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Every registered link once, oriented from the smaller handle.
    pub fn links(&self) -> Vec<LinkRecord> {
        let mut links: Vec<_> = self
            .interfaces
            .keys()
            .filter(|(a, b)| a < b)
            .filter_map(|&(a, b)| self.lookup(a, b).ok())
            .collect();
        links.sort_by_key(|link| (link.a.node, link.b.node));
        links
    }
}

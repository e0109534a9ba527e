use crate::error::CoreError;
use crate::registry::{LinkRecord, LinkRegistry};
use routeconv_abstract::{NodeHandle, SimulationContext};
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Up,
    Down,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up => f.write_str("up"),
            LinkState::Down => f.write_str("down"),
        }
    }
}

/// Toggles both ends of registered links.
#[derive(Debug, Clone)]
pub struct LinkController {
    registry: Rc<LinkRegistry>,
}

impl LinkController {
    pub fn new(registry: Rc<LinkRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    pub fn tear_down(
        &self,
        ctx: &mut dyn SimulationContext,
        a: NodeHandle,
        b: NodeHandle,
    ) -> Result<LinkRecord, CoreError> {
        self.set_state(ctx, a, b, LinkState::Down)
    }

    pub fn bring_up(
        &self,
        ctx: &mut dyn SimulationContext,
        a: NodeHandle,
        b: NodeHandle,
    ) -> Result<LinkRecord, CoreError> {
        self.set_state(ctx, a, b, LinkState::Up)
    }

    /// Apply `state` to both interfaces of the link. Nothing is touched when
    /// the pair is not registered.
    pub fn set_state(
        &self,
        ctx: &mut dyn SimulationContext,
        a: NodeHandle,
        b: NodeHandle,
        state: LinkState,
    ) -> Result<LinkRecord, CoreError> {
        let link = self.registry.lookup(a, b)?;
        for end in [link.a, link.b] {
            match state {
                LinkState::Up => ctx.set_interface_up(end.node, end.interface),
                LinkState::Down => ctx.set_interface_down(end.node, end.interface),
            }
        }
        info!(
            time_ms = ctx.now(),
            a = %ctx.node_name(a),
            b = %ctx.node_name(b),
            interface_a = link.a.interface,
            interface_b = link.b.interface,
            "link {state}"
        );
        Ok(link)
    }
}

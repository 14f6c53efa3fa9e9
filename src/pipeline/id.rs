//! Identity types for the pipeline graph.
//!
//! Node and edge ids are positions in a compiled graph's storage vectors,
//! assigned in stage order when the graph is compiled. Listener ids are
//! opaque handles returned by the listener registration calls.

use std::fmt;

/// Position of a component in `CompiledGraph::nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position of a link in `CompiledGraph::edges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

/// Handle for a registered pipeline listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_orders_by_position() {
        let mut ids = vec![NodeId(3), NodeId(0), NodeId(2)];
        ids.sort();
        assert_eq!(ids.iter().map(|id| id.index()).collect::<Vec<_>>(), vec![0, 2, 3]);
    }

    #[test]
    fn test_listener_id_display() {
        assert_eq!(ListenerId(3).to_string(), "listener#3");
    }
}

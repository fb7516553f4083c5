//! Node handles and connection chaining

use super::context::{AudioContext, ContextError};
use super::graph::NodeId;

/// Common behaviour of every node handle
pub trait AudioNode {
    /// Identifier of the node inside its context
    fn id(&self) -> NodeId;

    /// Context the node was created by
    fn context(&self) -> &AudioContext;

    /// Connect this node's output to `destination` and return `destination`,
    /// so connections can be chained.
    fn connect<'a, N: AudioNode>(&self, destination: &'a N) -> Result<&'a N, ContextError>
    where
        Self: Sized,
    {
        self.context()
            .connect_nodes(self.id(), destination.context(), destination.id())?;
        Ok(destination)
    }

    /// Remove every outgoing connection of this node
    fn disconnect(&self) {
        self.context().disconnect_node(self.id());
    }
}

/// Final node of a context, feeding the output device
#[derive(Debug, Clone)]
pub struct AudioDestinationNode {
    id: NodeId,
    context: AudioContext,
}

impl AudioDestinationNode {
    pub(crate) fn new(id: NodeId, context: AudioContext) -> Self {
        Self { id, context }
    }
}

impl AudioNode for AudioDestinationNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn context(&self) -> &AudioContext {
        &self.context
    }
}

use std::sync::Arc;

use crate::Result;

use super::graph::{AudioGraphProvider, MediaNode, MediaSource, NodeId, OscillatorSpec, TapOptions};

/// Nodes created for one session, released in reverse creation order on drop.
///
/// Every node is tracked the moment it exists, so an error half way through
/// building a graph, or a session discarded after a newer transition, cannot
/// leave anything behind in the provider.
pub(crate) struct SessionGraph {
    provider: Arc<dyn AudioGraphProvider>,
    nodes: Vec<NodeId>,
}

impl SessionGraph {
    pub(crate) fn new(provider: Arc<dyn AudioGraphProvider>) -> Self {
        Self {
            provider,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn provider(&self) -> &dyn AudioGraphProvider {
        self.provider.as_ref()
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn track(&mut self, node: NodeId) -> NodeId {
        self.nodes.push(node);
        node
    }

    pub(crate) async fn capture_source(&mut self) -> Result<NodeId> {
        let node = self.provider.create_capture_source().await?;
        Ok(self.track(node))
    }

    pub(crate) async fn media_source(&mut self, source: MediaSource) -> Result<MediaNode> {
        let media = self.provider.create_media_source(source).await?;
        self.track(media.node);
        Ok(media)
    }

    pub(crate) fn oscillator(&mut self, spec: OscillatorSpec) -> Result<NodeId> {
        let node = self.provider.create_oscillator(spec)?;
        Ok(self.track(node))
    }

    pub(crate) fn gain(&mut self, value: f32) -> Result<NodeId> {
        let node = self.provider.create_gain(value)?;
        Ok(self.track(node))
    }

    pub(crate) fn analysis_tap(&mut self, options: TapOptions) -> Result<NodeId> {
        let node = self.provider.create_analysis_tap(options)?;
        Ok(self.track(node))
    }

    pub(crate) fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        self.provider.connect(from, to)
    }

    pub(crate) fn destination(&self) -> NodeId {
        self.provider.destination()
    }
}

impl Drop for SessionGraph {
    fn drop(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        tracing::debug!(nodes = self.nodes.len(), "releasing session graph");
        for node in self.nodes.drain(..).rev() {
            self.provider.release(node);
        }
    }
}

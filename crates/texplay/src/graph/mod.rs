//! Playback graph: one branch per selected stream, from a source-stream node to an output.

pub mod audio_sink;

use std::sync::Arc;

use thiserror::Error;

use audio_sink::{AudioEndpoint, AudioEndpoints, select_endpoint};

use crate::platform::{MajorType, MediaSource, PlatformError, PresentationDescriptor, StreamDescriptor};
use crate::presenter::Presenter;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("stream {index} has unsupported media type '{major}'")]
    UnsupportedStream { index: u32, major: String },
    #[error("presentation has no selected streams")]
    NoStreams,
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

pub type NodeId = usize;

/// Audio renderer output. `endpoint == None` renders to the system default device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRenderer {
    pub endpoint: Option<AudioEndpoint>,
}

pub enum OutputNode {
    Video(Arc<Presenter>),
    Audio(AudioRenderer),
}

pub enum GraphNode {
    SourceStream {
        source: Arc<dyn MediaSource>,
        stream: StreamDescriptor,
    },
    Output(OutputNode),
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphNode::SourceStream { source, stream } => f
                .debug_struct("SourceStream")
                .field("url", &source.url())
                .field("index", &stream.index)
                .field("major", &stream.major_type)
                .finish(),
            GraphNode::Output(OutputNode::Video(p)) => {
                f.debug_tuple("VideoOutput").field(&p.id()).finish()
            }
            GraphNode::Output(OutputNode::Audio(a)) => {
                f.debug_tuple("AudioOutput").field(&a.endpoint).finish()
            }
        }
    }
}

/// A video branch as seen by the platform.
pub struct VideoBranch<'a> {
    pub source: &'a Arc<dyn MediaSource>,
    pub stream: &'a StreamDescriptor,
    pub presenter: &'a Arc<Presenter>,
}

#[derive(Debug, Default)]
pub struct MediaGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<(NodeId, NodeId)>,
}

impl MediaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        for id in [from, to] {
            if id >= self.nodes.len() {
                return Err(GraphError::UnknownNode(id));
            }
        }
        self.edges.push((from, to));
        Ok(())
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(NodeId, NodeId)] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn branches(&self) -> impl Iterator<Item = (&Arc<dyn MediaSource>, &StreamDescriptor, &OutputNode)> {
        self.edges.iter().filter_map(|&(from, to)| {
            match (&self.nodes[from], &self.nodes[to]) {
                (GraphNode::SourceStream { source, stream }, GraphNode::Output(output)) => {
                    Some((source, stream, output))
                }
                _ => None,
            }
        })
    }

    pub fn video_branches(&self) -> Vec<VideoBranch<'_>> {
        self.branches()
            .filter_map(|(source, stream, output)| match output {
                OutputNode::Video(presenter) => Some(VideoBranch {
                    source,
                    stream,
                    presenter,
                }),
                OutputNode::Audio(_) => None,
            })
            .collect()
    }

    pub fn audio_renderers(&self) -> Vec<&AudioRenderer> {
        self.branches()
            .filter_map(|(_, _, output)| match output {
                OutputNode::Audio(renderer) => Some(renderer),
                OutputNode::Video(_) => None,
            })
            .collect()
    }

    /// Distinct sources, in the order they were added.
    pub fn sources(&self) -> Vec<Arc<dyn MediaSource>> {
        let mut out: Vec<Arc<dyn MediaSource>> = Vec::new();
        for node in &self.nodes {
            if let GraphNode::SourceStream { source, .. } = node {
                if !out.iter().any(|s| Arc::ptr_eq(s, source)) {
                    out.push(source.clone());
                }
            }
        }
        out
    }
}

/// One source of a sequenced graph with the presenter its video should go to.
pub struct SequencedSource {
    pub source: Arc<dyn MediaSource>,
    pub presentation: PresentationDescriptor,
    pub presenter: Arc<Presenter>,
}

pub struct GraphBuilder<'a> {
    endpoints: &'a dyn AudioEndpoints,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(endpoints: &'a dyn AudioEndpoints) -> Self {
        Self { endpoints }
    }

    /// Graph for a single source. Any selected stream that is neither audio nor video fails
    /// the whole build.
    pub fn build(
        &self,
        source: &Arc<dyn MediaSource>,
        presentation: &PresentationDescriptor,
        presenter: &Arc<Presenter>,
        audio_hint: Option<&str>,
    ) -> Result<MediaGraph, GraphError> {
        let mut graph = MediaGraph::new();
        let mut audio = AudioChoice::new(self.endpoints, audio_hint);
        self.add_branches(&mut graph, source, presentation, presenter, &mut audio, false)?;
        if graph.node_count() == 0 {
            return Err(GraphError::NoStreams);
        }
        log::debug!(
            "Built graph for {} with {} nodes",
            source.url(),
            graph.node_count()
        );
        Ok(graph)
    }

    /// Graph playing several sources together. Sources after the first skip stream 0,
    /// conventionally their audio.
    pub fn build_sequenced(
        &self,
        parts: &[SequencedSource],
        audio_hint: Option<&str>,
    ) -> Result<MediaGraph, GraphError> {
        let mut graph = MediaGraph::new();
        let mut audio = AudioChoice::new(self.endpoints, audio_hint);
        for (i, part) in parts.iter().enumerate() {
            self.add_branches(
                &mut graph,
                &part.source,
                &part.presentation,
                &part.presenter,
                &mut audio,
                i > 0,
            )?;
        }
        if graph.node_count() == 0 {
            return Err(GraphError::NoStreams);
        }
        Ok(graph)
    }

    fn add_branches(
        &self,
        graph: &mut MediaGraph,
        source: &Arc<dyn MediaSource>,
        presentation: &PresentationDescriptor,
        presenter: &Arc<Presenter>,
        audio: &mut AudioChoice<'_>,
        skip_first_stream: bool,
    ) -> Result<(), GraphError> {
        for stream in presentation.selected() {
            if skip_first_stream && stream.index == 0 {
                continue;
            }
            let output = match &stream.major_type {
                MajorType::Video => OutputNode::Video(presenter.clone()),
                MajorType::Audio => OutputNode::Audio(AudioRenderer {
                    endpoint: audio.resolve(),
                }),
                MajorType::Other(name) => {
                    return Err(GraphError::UnsupportedStream {
                        index: stream.index,
                        major: name.clone(),
                    });
                }
            };
            let from = graph.add_node(GraphNode::SourceStream {
                source: source.clone(),
                stream: stream.clone(),
            });
            let to = graph.add_node(GraphNode::Output(output));
            graph.connect(from, to)?;
        }
        Ok(())
    }
}

/// Endpoint lookup done at most once per build.
struct AudioChoice<'a> {
    endpoints: &'a dyn AudioEndpoints,
    hint: Option<&'a str>,
    resolved: Option<Option<AudioEndpoint>>,
}

impl<'a> AudioChoice<'a> {
    fn new(endpoints: &'a dyn AudioEndpoints, hint: Option<&'a str>) -> Self {
        Self {
            endpoints,
            hint,
            resolved: None,
        }
    }

    fn resolve(&mut self) -> Option<AudioEndpoint> {
        self.resolved
            .get_or_insert_with(|| select_endpoint(self.endpoints, self.hint))
            .clone()
    }
}

use std::sync::Arc;

use crate::filter::{Filter, Transform};
use crate::log_entry::LogEntry;
use crate::sink::{Outputs, Sink};
use crate::tag::{Pattern, Tag};

/// A pattern plus the filters and outputs applied to every record whose tag
/// matches it. Immutable once built.
pub struct Pipeline {
    pattern: Pattern,
    filters: Vec<Arc<dyn Filter>>,
    outputs: Outputs,
}

impl Pipeline {
    pub fn builder(pattern: Pattern) -> PipelineBuilder {
        PipelineBuilder::new(pattern)
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    pub fn is_match(&self, tag: &Tag) -> bool {
        self.pattern.matches(tag)
    }

    /// Run the filter chain in order. Returns false on the first rejection;
    /// later filters do not run.
    pub fn apply_filters(&self, tag: &mut Tag, entry: &mut LogEntry) -> bool {
        self.filters.iter().all(|filter| filter.apply(tag, entry))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pattern", &self.pattern.as_str())
            .field("filters", &self.filters.len())
            .field(
                "outputs",
                &self.outputs.iter().map(|o| o.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

pub struct PipelineBuilder {
    pattern: Pattern,
    filters: Vec<Arc<dyn Filter>>,
    outputs: Vec<Arc<dyn Sink>>,
}

impl PipelineBuilder {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            filters: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Append a filter that may reject the record.
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn filter_arc(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Append a step that only mutates the record and always accepts it.
    pub fn transform<F>(self, f: F) -> Self
    where
        F: Fn(&mut Tag, &mut LogEntry) + Send + Sync + 'static,
    {
        self.filter(Transform(f))
    }

    pub fn output(mut self, sink: impl Sink + 'static) -> Self {
        self.outputs.push(Arc::new(sink));
        self
    }

    pub fn output_arc(mut self, sink: Arc<dyn Sink>) -> Self {
        self.outputs.push(sink);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            pattern: self.pattern,
            filters: self.filters,
            outputs: self.outputs.into(),
        }
    }
}

/// Ordered pipelines; the first whose pattern matches a tag handles it.
#[derive(Debug, Default)]
pub struct RoutingTable {
    pipelines: Vec<Pipeline>,
}

impl RoutingTable {
    pub fn new(pipelines: Vec<Pipeline>) -> Self {
        Self { pipelines }
    }

    pub fn push(&mut self, pipeline: Pipeline) {
        self.pipelines.push(pipeline);
    }

    pub fn route(&self, tag: &Tag) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.is_match(tag))
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

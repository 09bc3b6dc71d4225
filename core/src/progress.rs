//! Progress reporting kept out of the pipeline's way.
//!
//! Pipeline stages call into a [`ProgressReporter`] instead of printing. The
//! default [`SilentProgress`] does nothing; [`TracingProgress`] turns the
//! calls into `tracing` events for the command-line binary.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Loading,
    Embedding,
    Saving,
    Reading,
    Clustering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "load",
            Self::Embedding => "embed",
            Self::Saving => "save",
            Self::Reading => "read",
            Self::Clustering => "cluster",
        };
        f.write_str(name)
    }
}

pub trait ProgressReporter: Send + Sync {
    /// A stage begins; `total` is the number of units when known up front.
    fn start(&self, _stage: Stage, _total: Option<usize>) {}
    fn advance(&self, _stage: Stage, _amount: usize) {}
    fn finish(&self, _stage: Stage) {}
}

pub struct SilentProgress;

impl ProgressReporter for SilentProgress {}

#[derive(Default)]
pub struct TracingProgress {
    stages: Mutex<HashMap<Stage, (usize, Option<usize>)>>,
}

impl TracingProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for TracingProgress {
    fn start(&self, stage: Stage, total: Option<usize>) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.insert(stage, (0, total));
        }
        info!(%stage, ?total, "stage started");
    }

    fn advance(&self, stage: Stage, amount: usize) {
        let Ok(mut stages) = self.stages.lock() else {
            return;
        };
        let entry = stages.entry(stage).or_insert((0, None));
        entry.0 += amount;
        debug!(%stage, done = entry.0, total = ?entry.1, "progress");
    }

    fn finish(&self, stage: Stage) {
        let done = self
            .stages
            .lock()
            .ok()
            .and_then(|mut stages| stages.remove(&stage))
            .map_or(0, |(done, _)| done);
        info!(%stage, done, "stage finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_progress_counts() {
        let progress = TracingProgress::new();
        progress.start(Stage::Embedding, Some(3));
        progress.advance(Stage::Embedding, 1);
        progress.advance(Stage::Embedding, 2);
        assert_eq!(
            progress.stages.lock().unwrap().get(&Stage::Embedding),
            Some(&(3, Some(3)))
        );
        progress.finish(Stage::Embedding);
        assert!(progress.stages.lock().unwrap().is_empty());
    }
}

//! End-to-end runs: articles to store, and store to cluster results.

use std::sync::Arc;
use tracing::info;

use crate::article::Article;
use crate::config::PipelineConfig;
use crate::consumers::{
    cluster_embeddings, write_cluster_results, ClusterResult, ClusteringService,
    RESULT_ATTRIBUTES,
};
use crate::embeddings::{device::Device, model::EmbeddingBackend, BatchEmbedder, EmbedderConfig};
use crate::error::Result;
use crate::loader::ArticleLoader;
use crate::progress::{ProgressReporter, SilentProgress, Stage};
use crate::vector_store::{load_with_attributes, StoreWriter};

/// Summary of one [`EmbedPipeline::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub articles: usize,
    pub batches: usize,
    /// Width of the stored vectors, 0 for an empty corpus.
    pub dimensions: usize,
    pub device: Device,
    pub written: usize,
    pub overwritten: usize,
}

/// Loads articles, embeds their bodies and writes a fresh store.
///
/// The execution device is resolved once, in [`EmbedPipeline::new`], from the
/// configured preference and what the backend reports.
pub struct EmbedPipeline<B: EmbeddingBackend> {
    config: PipelineConfig,
    embedder: BatchEmbedder<B>,
    progress: Arc<dyn ProgressReporter>,
}

impl<B: EmbeddingBackend> EmbedPipeline<B> {
    /// # Errors
    /// An invalid configuration.
    pub fn new(config: PipelineConfig, backend: B) -> Result<Self> {
        config.validate()?;
        let device = config.device.resolve(backend.accelerator_available());
        info!(%device, precision = ?device.precision(), "resolved execution device");
        let embedder = BatchEmbedder::new(
            backend,
            EmbedderConfig {
                max_tokens: config.max_tokens,
                device,
            },
        )?;
        Ok(Self {
            config,
            embedder,
            progress: Arc::new(SilentProgress),
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.embedder = self.embedder.with_progress(Arc::clone(&progress));
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.embedder.device()
    }

    pub fn backend(&self) -> &B {
        self.embedder.backend()
    }

    /// Runs the whole pipeline once.
    ///
    /// The store at `store_path` is replaced once every record has been
    /// written. Running twice over unchanged input yields the same keys and
    /// vectors, since keys are derived from content.
    ///
    /// # Errors
    /// Loader, embedder and store errors all abort the run. A failed run
    /// leaves any previous store at `store_path` as it was.
    pub async fn run(&self) -> Result<RunReport> {
        let articles = self.load_articles()?;

        let texts: Vec<&str> = articles.iter().map(Article::body).collect();
        let vectors = self.embedder.embed(&texts, self.config.batch_size).await?;

        self.progress.start(Stage::Saving, Some(articles.len()));
        let mut writer = StoreWriter::replace(&self.config.store_path)?
            .with_collision_policy(self.config.collisions);
        let saved = writer.save(&articles, &vectors)?;
        writer.finish()?;
        self.progress.advance(Stage::Saving, saved.written);
        self.progress.finish(Stage::Saving);

        let report = RunReport {
            articles: articles.len(),
            batches: articles.len().div_ceil(self.config.batch_size),
            dimensions: vectors.first().map_or(0, Vec::len),
            device: self.device(),
            written: saved.written,
            overwritten: saved.overwritten,
        };
        info!(
            store = %self.config.store_path.display(),
            written = report.written,
            overwritten = report.overwritten,
            dimensions = report.dimensions,
            "embedding store written"
        );
        Ok(report)
    }

    fn load_articles(&self) -> Result<Vec<Article>> {
        let loader = ArticleLoader::new(self.config.input_dir.clone())
            .pattern(self.config.file_pattern.clone())
            .recursive(self.config.recursive)
            .malformed_lines(self.config.malformed_lines);

        self.progress.start(Stage::Loading, None);
        let articles = loader.load_all()?;
        self.progress.advance(Stage::Loading, articles.len());
        self.progress.finish(Stage::Loading);
        info!(
            dir = %self.config.input_dir.display(),
            articles = articles.len(),
            "loaded articles"
        );
        Ok(articles)
    }
}

/// Reads a finished store, clusters it and writes the labelled results.
pub struct ClusterPipeline {
    config: PipelineConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl ClusterPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            progress: Arc::new(SilentProgress),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Clusters every record in the store and writes the results JSON.
    ///
    /// # Errors
    /// Store and service errors. A failing service leaves both the store and
    /// any previous results file untouched.
    pub async fn run<S: ClusteringService + ?Sized>(
        &self,
        service: &S,
    ) -> Result<Vec<ClusterResult>> {
        self.progress.start(Stage::Reading, None);
        let embeddings = load_with_attributes(&self.config.store_path, &RESULT_ATTRIBUTES)?;
        self.progress.advance(Stage::Reading, embeddings.len());
        self.progress.finish(Stage::Reading);

        self.progress.start(Stage::Clustering, Some(embeddings.len()));
        let results = cluster_embeddings(&embeddings, service).await?;
        self.progress.advance(Stage::Clustering, results.len());
        self.progress.finish(Stage::Clustering);

        write_cluster_results(&self.config.results_path, &results)?;
        info!(
            results = %self.config.results_path.display(),
            records = results.len(),
            "cluster results written"
        );
        Ok(results)
    }
}

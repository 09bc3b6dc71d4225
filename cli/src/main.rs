use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use newsmap::prelude::*;
use newsmap::providers::embeddings::{HashingBackend, HttpTokenBackend};
use newsmap::vector_store;
use newsmap_cluster_http::HttpClusteringService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Embed news article dumps into a content-addressed vector store.
#[derive(Parser, Debug)]
#[command(name = "newsmap", version, about)]
struct Cli {
    /// JSON pipeline configuration; flags override its values.
    #[arg(short, long, global = true, env = "NEWSMAP_CONFIG")]
    config: Option<PathBuf>,
    /// Log debug events (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load articles, embed them and write a fresh store.
    Embed {
        /// Directory holding the `*.jsonl` dumps.
        #[arg(short, long, env = "NEWSMAP_INPUT")]
        input: Option<PathBuf>,
        #[arg(short, long, env = "NEWSMAP_STORE")]
        store: Option<PathBuf>,
        /// Also read dumps in sub-directories.
        #[arg(long)]
        recursive: bool,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        max_tokens: Option<usize>,
        /// auto, accelerator or cpu.
        #[arg(long, env = "NEWSMAP_DEVICE")]
        device: Option<DevicePreference>,
        /// skip or abort.
        #[arg(long)]
        malformed_lines: Option<MalformedLinePolicy>,
        /// overwrite or reject.
        #[arg(long)]
        collisions: Option<CollisionPolicy>,
        #[arg(long, value_enum, default_value_t = BackendKind::Hashing)]
        backend: BackendKind,
        /// JSON configuration handed to the `http` backend.
        #[arg(long, env = "NEWSMAP_BACKEND_CONFIG")]
        backend_config: Option<String>,
        /// Vector width of the `hashing` backend.
        #[arg(long, default_value_t = 384)]
        hashing_dims: usize,
    },
    /// Summarize an existing store.
    Inspect {
        #[arg(short, long, env = "NEWSMAP_STORE")]
        store: Option<PathBuf>,
        /// How many records to list.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Show the full record stored under this hex key instead.
        #[arg(long)]
        key: Option<String>,
    },
    /// Cluster a store and write the labelled results as JSON.
    Cluster {
        #[arg(short, long, env = "NEWSMAP_STORE")]
        store: Option<PathBuf>,
        #[arg(short, long)]
        results: Option<PathBuf>,
        /// Local algorithm, used when no endpoint is given.
        #[arg(short, long, value_enum, default_value_t = AlgorithmKind::Kmeans)]
        algorithm: AlgorithmKind,
        /// Number of clusters for k-means.
        #[arg(short, long, default_value_t = 8)]
        k: usize,
        #[arg(long, default_value_t = KMeans::DEFAULT_MAX_ITERS)]
        max_iters: usize,
        /// Neighbourhood radius for dbscan.
        #[arg(long, default_value_t = 0.5)]
        eps: f32,
        /// Points within `eps`, itself included, that make a dbscan core point.
        #[arg(long, default_value_t = 5)]
        min_pts: usize,
        /// Remote clustering endpoint; the local algorithm runs when absent.
        #[arg(long, env = "NEWSMAP_CLUSTER_ENDPOINT")]
        endpoint: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendKind {
    /// Deterministic token hashing, no model needed
    Hashing,
    /// Remote token-state inference server
    Http,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum AlgorithmKind {
    Kmeans,
    /// Density-based, labels noise as cluster 0
    Dbscan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config `{}`", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Embed {
            input,
            store,
            recursive,
            batch_size,
            max_tokens,
            device,
            malformed_lines,
            collisions,
            backend,
            backend_config,
            hashing_dims,
        } => {
            override_with(&mut config.input_dir, input);
            override_with(&mut config.store_path, store);
            override_with(&mut config.batch_size, batch_size);
            override_with(&mut config.max_tokens, max_tokens);
            override_with(&mut config.device, device);
            override_with(&mut config.malformed_lines, malformed_lines);
            override_with(&mut config.collisions, collisions);
            config.recursive |= recursive;

            let backend: Box<dyn EmbeddingBackend> = match backend {
                BackendKind::Hashing => Box::new(HashingBackend::new(hashing_dims)),
                BackendKind::Http => Box::new(
                    HttpTokenBackend::new(backend_config.as_deref())
                        .context("configuring http backend")?,
                ),
            };
            let pipeline = EmbedPipeline::new(config, backend)?
                .with_progress(Arc::new(TracingProgress::new()));
            let report = pipeline.run().await.with_context(|| {
                format!(
                    "embedding `{}` into `{}`",
                    pipeline.config().input_dir.display(),
                    pipeline.config().store_path.display()
                )
            })?;
            info!(
                articles = report.articles,
                batches = report.batches,
                device = %report.device,
                "done"
            );
        }
        Commands::Inspect { store, limit, key } => {
            override_with(&mut config.store_path, store);
            match key {
                Some(key) => show_record(&config, &key)?,
                None => inspect(&config, limit)?,
            }
        }
        Commands::Cluster {
            store,
            results,
            algorithm,
            k,
            max_iters,
            eps,
            min_pts,
            endpoint,
        } => {
            override_with(&mut config.store_path, store);
            override_with(&mut config.results_path, results);
            let pipeline = ClusterPipeline::new(config.clone())
                .with_progress(Arc::new(TracingProgress::new()));

            let labelled = match (endpoint, algorithm) {
                (Some(url), _) => {
                    let service = HttpClusteringService::from_url(&url)?;
                    pipeline.run(&service).await
                }
                (None, AlgorithmKind::Kmeans) => pipeline.run(&KMeans::new(k, max_iters)?).await,
                (None, AlgorithmKind::Dbscan) => pipeline.run(&Dbscan::new(eps, min_pts)?).await,
            }
            .with_context(|| format!("clustering `{}`", config.store_path.display()))?;

            let clusters: std::collections::BTreeSet<i64> =
                labelled.iter().map(|r| r.cluster).collect();
            info!(
                records = labelled.len(),
                clusters = clusters.len(),
                results = %config.results_path.display(),
                "done"
            );
        }
    }
    Ok(())
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn inspect(config: &PipelineConfig, limit: usize) -> Result<()> {
    let loaded = vector_store::load(&config.store_path)
        .with_context(|| format!("reading `{}`", config.store_path.display()))?;

    println!("store:      {}", config.store_path.display());
    println!("records:    {}", loaded.len());
    match loaded.dimensions() {
        Some(dims) => println!("dimensions: {dims}"),
        None => println!("dimensions: -"),
    }
    for (key, title) in loaded.keys.iter().zip(loaded.titles()).take(limit) {
        println!("{key}  {title}");
    }
    if loaded.len() > limit {
        println!("... {} more", loaded.len() - limit);
    }
    Ok(())
}

fn lookup(config: &PipelineConfig, key: &str) -> Result<Option<StoredRecord>> {
    let key = EmbeddingKey::parse(key)
        .with_context(|| format!("`{key}` is not a {}-character hex key", EmbeddingKey::LEN))?;
    let mut store = EmbeddingStore::open(&config.store_path)
        .with_context(|| format!("opening `{}`", config.store_path.display()))?;
    Ok(store.get(&key)?)
}

fn show_record(config: &PipelineConfig, key: &str) -> Result<()> {
    let Some(record) = lookup(config, key)? else {
        anyhow::bail!("no record under {key} in `{}`", config.store_path.display());
    };
    println!("key:        {}", record.key);
    println!("dimensions: {}", record.vector.len());
    for (name, value) in &record.attributes {
        println!("{name}: {}", value.as_text());
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_arguments() {
        let cli = Cli::try_parse_from([
            "newsmap", "cluster", "--algorithm", "dbscan", "--eps", "0.3", "--min-pts", "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Cluster {
                algorithm,
                eps,
                min_pts,
                ..
            } => {
                assert_eq!(algorithm, AlgorithmKind::Dbscan);
                assert_eq!(eps, 0.3);
                assert_eq!(min_pts, 4);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["newsmap", "cluster"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cluster {
                algorithm: AlgorithmKind::Kmeans,
                k: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_lookup_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            store_path: dir.path().join("articles.nmst"),
            ..PipelineConfig::default()
        };
        let article = Article::from_json_line(r#"{"id":"a1","title":"First","body":"text"}"#)
            .unwrap()
            .unwrap();
        let mut writer = StoreWriter::create(&config.store_path).unwrap();
        writer.save(&[article], &[vec![0.5, 1.5]]).unwrap();
        writer.finish().unwrap();

        let key = EmbeddingKey::from_identity("a1");
        let record = lookup(&config, key.as_str()).unwrap().unwrap();
        assert_eq!(record.vector, vec![0.5, 1.5]);
        assert_eq!(record.title(), "First");

        let absent = EmbeddingKey::from_identity("zz");
        assert!(lookup(&config, absent.as_str()).unwrap().is_none());
        assert!(lookup(&config, "not-a-key").is_err());
    }
}

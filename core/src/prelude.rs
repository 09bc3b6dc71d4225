pub use crate::article::Article;
pub use crate::config::PipelineConfig;
pub use crate::consumers::{ClusterResult, ClusteringService, Dbscan, KMeans, Projector};
pub use crate::embeddings::{
    device::{Device, DevicePreference, Precision},
    model::{BackendError, EmbeddingBackend, ForwardRequest, TokenStates},
    BatchEmbedder, EmbedderConfig,
};
pub use crate::identity::{derive_key, EmbeddingKey};
pub use crate::loader::{ArticleLoader, MalformedLinePolicy};
pub use crate::pipeline::{ClusterPipeline, EmbedPipeline, RunReport};
pub use crate::progress::{ProgressReporter, SilentProgress, Stage, TracingProgress};
pub use crate::vector_store::{
    CollisionPolicy, EmbeddingStore, LoadedEmbeddings, StoreWriter, StoredRecord,
};

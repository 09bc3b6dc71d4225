/// Builtin embedding backends
pub mod embeddings;

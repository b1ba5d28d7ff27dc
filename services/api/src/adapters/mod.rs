pub mod chroma;
pub mod db;
pub mod embeddings;
pub mod extract;
pub mod ollama;

pub use chroma::{connect as connect_vector_index, ChromaAdapter, ChromaApi, ChromaSettings};
pub use db::DbAdapter;
pub use embeddings::OllamaEmbedder;
pub use extract::FileTextExtractor;
pub use ollama::OllamaAdapter;

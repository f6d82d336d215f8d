pub mod embeddings;
pub mod extract;
pub mod generation;
pub mod render;

pub use embeddings::OpenAiEmbeddingAdapter;
pub use extract::DocumentExtractor;
pub use generation::OpenAiGenerationAdapter;
pub use render::HtmlRenderAdapter;

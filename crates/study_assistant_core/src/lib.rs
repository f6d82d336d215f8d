pub mod chunker;
pub mod domain;
pub mod ports;

pub use domain::{
    ArtifactKind, ChatTurn, DocumentKind, DocumentRecord, IngestStatus, IngestedFile, SearchHit,
    Session, SessionKey,
};
pub use ports::{
    DocumentRenderService, EmbeddingService, GenerationService, PortError, PortResult,
    TextExtractionService,
};

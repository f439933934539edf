pub mod db;
pub mod dream;
pub mod embedding;
pub mod episodic;
pub mod history;
pub mod persona;
pub mod relationship;

pub use db::open_pool;
pub use dream::{DreamConsolidator, DreamSummarizer};
pub use embedding::{cosine_similarity, Embedder, Embedding, FastEmbedder, HashEmbedder};
pub use episodic::{EpisodicMemory, MemoryEntry, Source};
pub use history::{HistoryMessage, HistoryStore, MemorySaver, SessionHistory, Summarizer};
pub use persona::{PersonaConfig, PersonaRetriever, SpeechStyle};
pub use relationship::{DimensionDelta, ExpressionHabit, MemoryPoint, Profile, RelationshipStore};

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryChunkStore;
pub use qdrant::QdrantStore;

// Embedding pipeline: text chunking and the embedding-service client.

pub mod chunking;
pub mod client;

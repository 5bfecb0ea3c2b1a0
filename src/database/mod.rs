// Storage backends: SQLite for relational metadata and message logs,
// LanceDB for the append-only embedding index.

pub mod lancedb;
pub mod sqlite;

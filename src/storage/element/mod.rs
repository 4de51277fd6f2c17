//! Classification element backends.
//!
//! | Backend | Storage | Concurrency |
//! |---------|---------|-------------|
//! | Memory | Field on the instance | Instance-scoped re-entrant lock |
//! | PostgreSQL | One row per `(type, uuid)` | Database transactions and upserts |

mod memory;
mod postgresql;

pub use memory::MemoryClassificationElement;
pub use postgresql::PostgresClassificationElement;

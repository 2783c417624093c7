pub mod audit;
pub mod database;

pub use audit::{record_quietly, AuditRecord, AuditSink, SqliteAuditSink, TracingAuditSink};
pub use database::Database;

// PostgreSQL access layer
pub mod pg;

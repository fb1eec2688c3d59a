pub mod parsing;
pub mod query_log;

pub use query_log::render_query;

pub mod decode;
pub mod row;
mod text;
pub mod value;

pub use decode::{decode_row, decode_values};
pub use row::{RecordSet, Row};
pub use value::ColumnValue;

//! HTTP request parsing helpers.

mod multipart;
mod parser;

pub use multipart::parse_multipart;
pub use parser::{decode_path_segment, parse_query_string};

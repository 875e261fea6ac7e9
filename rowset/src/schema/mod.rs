mod parser;
mod types;

pub use parser::{parse_dictionary, parse_dictionary_str};
pub use types::*;

pub mod parser;
pub mod xml;

pub use parser::{EventFormat, EventParser};

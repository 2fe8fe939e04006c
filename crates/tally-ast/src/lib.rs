//! Tally query shorthand - parser and AST types
//!
//! `monthly on date sum(revenue), mean(units) by region from 2024-01-01 to 2024-03-31`

pub mod ast;
mod parser;
mod to_ir;

pub use ast::*;
pub use parser::{parse, ParseError};
pub use to_ir::parse_spec;

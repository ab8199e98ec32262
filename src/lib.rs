pub mod ast;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Source position attached to lexer, parser and static-analysis errors.
#[derive(Debug, Clone)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: PathBuf, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filename = self
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_else(|| self.file.to_str().unwrap_or("<unknown>"));
        write!(f, "{} line {} column {}", filename, self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum FountainError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lex error: {message}{}", suffix(.location))]
    Lex {
        message: String,
        location: Option<Location>,
    },
    #[error("parse error: {message}{}", suffix(.location))]
    Parse {
        message: String,
        location: Option<Location>,
    },
    #[error("control flow error: {message}{}", suffix(.location))]
    ControlFlow {
        message: String,
        location: Option<Location>,
    },
    #[error("type error: {0}")]
    Type(String),
    #[error("argument error: {0}")]
    Argument(String),
    #[error("name error: {0}")]
    UndefinedName(String),
    #[error("assertion error: {0}")]
    Assertion(String),
    #[error("resource error: {0}")]
    Resource(String),
}

pub type FountainResult<T> = Result<T, FountainError>;

fn suffix(location: &Option<Location>) -> String {
    match location {
        Some(loc) => format!("\nFile: {}", loc),
        None => String::new(),
    }
}

/// Translate a byte offset into a 1-based (line, column) pair.
/// Columns count characters, not bytes.
pub fn byte_offset_to_position(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.chars().filter(|&c| c == '\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = source[line_start..offset].chars().count() + 1;
    (line, column)
}

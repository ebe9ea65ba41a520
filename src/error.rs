//! Custom error types for the application
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Symbol error: {0}")]
    SymbolError(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Memory behind a typed view is unreadable or malformed.
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Unknown structure type: {0}")]
    UnknownType(String),

    #[error("Unknown member '{member}' in struct {type_name}")]
    UnknownMember { type_name: String, member: String },

    /// A walk did not reach a terminal condition within its step bound.
    #[error("Traversal did not terminate within {0} steps")]
    DegenerateTraversal(usize),

    #[error("This command does not support the selected profile (os={os}, arch={arch})")]
    ProfileMismatch { os: String, arch: String },

    #[error("JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("CSV into_inner error: {0}")]
    CsvIntoInnerError(#[from] csv::IntoInnerError<csv::Writer<Vec<u8>>>),

    #[error("UTF-8 conversion error: {0}")]
    FromUtf8Error(#[from] std::string::FromUtf8Error),

    #[error("ELF error: {0}")]
    ElfError(#[from] goblin::error::Error),
}

impl AnalysisError {
    /// True for errors that mean "this piece of the snapshot is unusable" rather than
    /// a setup or I/O failure. Callers skip such objects instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::InvalidStructure(_)
                | AnalysisError::DegenerateTraversal(_)
        )
    }
}

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LoaderError {
    #[error("invalid accession: {0:?}")]
    InvalidAccession(String),

    #[error("unrecognized accession (expected a K or P prefix): {0}")]
    UnrecognizedAccession(String),

    #[error("invalid sample id: {0}")]
    InvalidSampleId(String),

    #[error("malformed record in {source_name} line {line}: {message}")]
    MalformedRecord {
        source_name: String,
        line: u64,
        message: String,
    },

    #[error("missing config file at {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("annotation service request failed: {0}")]
    ServiceHttp(String),

    #[error("annotation service returned status {status}: {message}")]
    ServiceUnavailable { status: u16, message: String },

    #[error("annotation service returned an unreadable response: {0}")]
    ServiceMalformed(String),

    #[error("reference download failed: {0}")]
    ReferenceHttp(String),

    #[error("reference download returned status {status}: {message}")]
    ReferenceStatus { status: u16, message: String },

    #[error("association for sample {sample_id} and accession {accession} already exists")]
    #[diagnostic(help("the per-sample loaded check should have skipped this sample"))]
    DuplicateAssociation { sample_id: i64, accession: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl LoaderError {
    pub fn malformed(source_name: impl Into<String>, line: u64, message: impl Into<String>) -> Self {
        LoaderError::MalformedRecord {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LoaderError::StoreUnavailable(_)
                | LoaderError::ServiceUnavailable { .. }
                | LoaderError::ServiceMalformed(_)
                | LoaderError::ServiceHttp(_)
        )
    }
}

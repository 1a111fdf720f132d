use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ImportError {
    #[error("invalid genome accession: {0}")]
    InvalidGenomeAccession(String),

    #[error("invalid taxon id: {0}")]
    InvalidTaxonId(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse YAML config: {0}")]
    ConfigParse(String),

    #[error("config is missing required field: {0}")]
    MissingConfigField(String),

    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid assembly report on line {line}: {message}")]
    ReportParse { line: usize, message: String },

    #[error("assembly report {accession} is missing {field}")]
    MissingReportField { accession: String, field: String },

    #[error("error fetching sequence report: {0}")]
    SequenceFetch(String),

    #[error("timed out after {seconds}s fetching sequence report for {accession}")]
    SequenceTimeout { accession: String, seconds: u64 },

    #[error("invalid sequence report for {accession}: {message}")]
    SequenceParse { accession: String, message: String },

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("headers in {path} do not match the configured headers")]
    HeaderMismatch { path: PathBuf },

    #[error("invalid TSV file {path}: {message}")]
    TsvParse { path: PathBuf, message: String },

    #[error("error fetching datasets summary: {0}")]
    SummaryFetch(String),

    #[error("file {path} has less than {min_lines} lines: {lines}")]
    SummaryTooShort {
        path: PathBuf,
        lines: usize,
        min_lines: usize,
    },
}

impl ImportError {
    /// Failures worth another attempt: external commands and the network.
    pub fn is_retryable(&self) -> bool {
        match self {
            ImportError::SequenceFetch(_)
            | ImportError::SequenceParse { .. }
            | ImportError::NcbiHttp(_)
            | ImportError::SummaryFetch(_)
            | ImportError::SummaryTooShort { .. } => true,
            ImportError::NcbiStatus { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_not_retried() {
        let err = ImportError::SequenceTimeout {
            accession: "GCA_000001405.29".to_string(),
            seconds: 120,
        };
        assert!(!err.is_retryable());
        assert!(ImportError::SequenceFetch("exit 1".to_string()).is_retryable());
        assert!(
            !ImportError::NcbiStatus {
                status: 404,
                message: "not found".to_string()
            }
            .is_retryable()
        );
    }
}

//! Error taxonomy shared by every pipeline.
//!
//! Functions return `anyhow::Result`; the variants below are raised where a
//! caller may need to tell failure kinds apart and can be recovered with
//! `err.downcast_ref::<RagError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// A required input file (template, context, manifest) is absent.
    #[error("{what} missing: {}", path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    #[error("Vector store not found at {}. Run `docrag ingest` first.", .0.display())]
    IndexNotFound(PathBuf),

    #[error("No documents discovered. Add files to the source directories or specify --source.")]
    NoDocuments,

    /// Unresolvable credential or invalid setting.
    #[error("{0}")]
    Config(String),

    #[error("Unsupported embedding model: {0}")]
    UnsupportedModel(String),

    /// Non-success HTTP status from a remote service.
    #[error("{service} error {status}: {body}")]
    Remote {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected {service} response: {detail}")]
    UnexpectedResponse {
        service: &'static str,
        detail: String,
    },
}

impl RagError {
    pub fn config(message: impl Into<String>) -> Self {
        RagError::Config(message.into())
    }

    pub fn missing(what: &'static str, path: impl Into<PathBuf>) -> Self {
        RagError::MissingInput {
            what,
            path: path.into(),
        }
    }
}

//! Reading document text from disk when the client did not send it.

use std::path::PathBuf;

use crate::protocol::file_uri_to_path;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("{uri} is not a file URI")]
    NotAFile { uri: String },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub async fn read_document(uri: &str) -> Result<String, ContentError> {
    let path = file_uri_to_path(uri).ok_or_else(|| ContentError::NotAFile {
        uri: uri.to_string(),
    })?;
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ContentError::Read { path, source })
}

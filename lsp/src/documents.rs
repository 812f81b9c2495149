//! Document store: per-URI text, raw analysis and diagnostics.
//!
//! Every operation takes the store lock once, so each call observes and
//! leaves a consistent state. Sequences spanning several calls are guarded
//! by [`DocumentVersion`]: writes carry the version the caller started from
//! and are rejected with [`StoreError::Stale`] once the text has moved on.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{Diagnostic, DocumentSnapshot, DocumentVersion};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown document: {uri}")]
    UnknownDocument { uri: String },
    /// Benign: the exact text was already stored for this document.
    #[error("document {uri} already holds this text")]
    Unchanged { uri: String },
    #[error("document {uri} moved from {expected} to {current}")]
    Stale {
        uri: String,
        expected: DocumentVersion,
        current: DocumentVersion,
    },
}

#[derive(Debug)]
struct Document {
    text: String,
    version: DocumentVersion,
    /// Raw backend output from the most recent attempt, parsed or not.
    latest_attempt: Option<String>,
    /// Raw backend output the current diagnostics were parsed from.
    analysis: Option<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Document {
    fn check_version(&self, uri: &str, expected: DocumentVersion) -> Result<(), StoreError> {
        if self.version == expected {
            Ok(())
        } else {
            Err(StoreError::Stale {
                uri: uri.to_string(),
                expected,
                current: self.version,
            })
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: Mutex<HashMap<String, Document>>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Document>> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a document's text.
    ///
    /// Returns the new version, or [`StoreError::Unchanged`] when `text` is
    /// identical to what is already stored.
    pub fn store(&self, uri: &str, text: &str) -> Result<DocumentVersion, StoreError> {
        let mut documents = self.lock();
        if let Some(doc) = documents.get_mut(uri) {
            if doc.text == text {
                return Err(StoreError::Unchanged {
                    uri: uri.to_string(),
                });
            }
            doc.text = text.to_string();
            doc.version = doc.version.next();
            return Ok(doc.version);
        }

        documents.insert(
            uri.to_string(),
            Document {
                text: text.to_string(),
                version: DocumentVersion::FIRST,
                latest_attempt: None,
                analysis: None,
                diagnostics: Vec::new(),
            },
        );
        Ok(DocumentVersion::FIRST)
    }

    /// Record the raw output of an analysis attempt started at `version`.
    pub fn store_analysis(
        &self,
        uri: &str,
        version: DocumentVersion,
        raw: &str,
    ) -> Result<(), StoreError> {
        let mut documents = self.lock();
        let doc = documents
            .get_mut(uri)
            .ok_or_else(|| unknown(uri))?;
        doc.check_version(uri, version)?;
        doc.latest_attempt = Some(raw.to_string());
        Ok(())
    }

    /// Replace the diagnostic list wholesale.
    ///
    /// The raw text recorded by the last [`store_analysis`](Self::store_analysis)
    /// becomes the diagnostics' source under the same lock.
    pub fn update_diagnostics(
        &self,
        uri: &str,
        version: DocumentVersion,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(), StoreError> {
        let mut documents = self.lock();
        let doc = documents
            .get_mut(uri)
            .ok_or_else(|| unknown(uri))?;
        doc.check_version(uri, version)?;
        doc.analysis.clone_from(&doc.latest_attempt);
        doc.diagnostics = diagnostics;
        Ok(())
    }

    pub fn get_diagnostics(&self, uri: &str) -> Result<Vec<Diagnostic>, StoreError> {
        self.lock()
            .get(uri)
            .map(|doc| doc.diagnostics.clone())
            .ok_or_else(|| unknown(uri))
    }

    pub fn text(&self, uri: &str) -> Result<String, StoreError> {
        self.lock()
            .get(uri)
            .map(|doc| doc.text.clone())
            .ok_or_else(|| unknown(uri))
    }

    pub fn version(&self, uri: &str) -> Result<DocumentVersion, StoreError> {
        self.lock()
            .get(uri)
            .map(|doc| doc.version)
            .ok_or_else(|| unknown(uri))
    }

    pub fn snapshot(&self, uri: &str) -> Result<DocumentSnapshot, StoreError> {
        self.lock()
            .get(uri)
            .map(|doc| DocumentSnapshot {
                uri: uri.to_string(),
                version: doc.version,
                text: doc.text.clone(),
                analysis: doc.analysis.clone(),
                latest_attempt: doc.latest_attempt.clone(),
                diagnostics: doc.diagnostics.clone(),
            })
            .ok_or_else(|| unknown(uri))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn unknown(uri: &str) -> StoreError {
    StoreError::UnknownDocument {
        uri: uri.to_string(),
    }
}

//! FuzzLSP language server core.
//!
//! Documents flow from the editor through [`handlers`] into the
//! [`documents`] store, are analysed by the backend via [`analysis`], and
//! come back out as protocol diagnostics, hovers, completions and code
//! actions. [`server`] runs the JSON-RPC loop over any async byte stream.

pub mod actions;
pub mod analysis;
pub mod codec;
pub mod completion;
pub mod content;
pub mod diagnostics;
pub mod documents;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

pub use analysis::{AnalysisError, AnalysisOptions, Analyzer, RetryPrompt};
pub use documents::{DocumentStore, StoreError};
pub use handlers::{HandlerError, Handlers, ServerOptions};
pub use server::Server;
pub use transport::{Transport, TransportError};
pub use types::{Diagnostic, DocumentSnapshot, DocumentVersion, SeverityTag};

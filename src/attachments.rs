//! Pending attachment table (spec §3, §5): per-request tracking of
//! fire-and-forget upload tasks that must complete before the response ends.
//!
//! Kept a `Mutex<HashMap<..>>` rather than a concurrent map crate: the teacher
//! never reaches for `dashmap` anywhere in `llm/provider.rs`'s `ProviderState`/
//! `ProviderConfig`, both of which are plain `Arc<RwLock<..>>`-guarded structs.

use crate::error::AttachmentUploadError;
use crate::protocol::Identifier;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::JoinHandle;

/// Result of a completed attachment upload (spec §6's upload endpoint contract).
#[derive(Debug, Clone)]
pub struct UploadedAttachment {
    pub inline_ref: Option<String>,
    pub attachment_url: String,
}

/// The external collaborator the core only schedules and drains: actually
/// performing the HTTP upload to the platform's storage is out of scope
/// (spec §1), so this is a hook, not an implementation.
#[async_trait::async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload(
        &self,
        message_id: &Identifier,
        is_inline: bool,
        download_url: &str,
    ) -> Result<UploadedAttachment, AttachmentUploadError>;
}

/// Keyed by message_id; values are the in-flight upload tasks scheduled for
/// that query response. Never survives past the response it belongs to.
#[derive(Default)]
pub struct PendingAttachmentTable {
    inner: Mutex<HashMap<Identifier, Vec<JoinHandle<Result<UploadedAttachment, AttachmentUploadError>>>>>,
}

impl PendingAttachmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight upload task for `message_id`. Creates the entry
    /// on first call for that message.
    pub fn schedule(
        &self,
        message_id: Identifier,
        task: JoinHandle<Result<UploadedAttachment, AttachmentUploadError>>,
    ) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.entry(message_id).or_default().push(task);
    }

    /// Await and remove every task registered for `message_id`, returning
    /// any upload errors encountered. Called once, at the end of the query
    /// response; the entry is gone afterward regardless of outcome.
    pub async fn drain(&self, message_id: &Identifier) -> Vec<AttachmentUploadError> {
        let tasks = {
            let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            guard.remove(message_id).unwrap_or_default()
        };

        let mut errors = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => errors.push(e),
                Err(join_err) => errors.push(AttachmentUploadError(join_err.to_string())),
            }
        }
        errors
    }

    pub fn pending_count(&self, message_id: &Identifier) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.get(message_id).map(|v| v.len()).unwrap_or(0)
    }
}

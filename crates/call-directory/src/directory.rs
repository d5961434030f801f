//! The Call Directory contract
//!
//! All operations act on behalf of one authenticated local user. Reporting
//! calls (`mark_joined`, `end_call`) are treated by callers as best-effort.

use async_trait::async_trait;

use callrelay_signaling::{CallId, UserId};

use crate::error::{DirectoryError, DirectoryResult};
use crate::types::{CallRecord, UserProfile};

#[async_trait]
pub trait CallDirectory: Send + Sync {
    /// Create a pending call from the local user to `receiver_id`
    async fn create_invitation(&self, receiver_id: &UserId) -> DirectoryResult<CallRecord>;

    /// Accept a pending call addressed to the local user. Assigns the room id.
    async fn accept_call(&self, call_id: &CallId) -> DirectoryResult<CallRecord>;

    /// Calls the local user takes part in, newest first
    async fn active_calls(&self) -> DirectoryResult<Vec<CallRecord>>;

    /// Look up one call record
    async fn find_call(&self, call_id: &CallId) -> DirectoryResult<CallRecord> {
        self.active_calls()
            .await?
            .into_iter()
            .find(|call| &call.call_id == call_id)
            .ok_or_else(|| DirectoryError::not_found(format!("call {}", call_id)))
    }

    async fn user_profile(&self, user_id: &UserId) -> DirectoryResult<UserProfile>;

    /// Record that the local user joined the media session
    async fn mark_joined(&self, call_id: &CallId) -> DirectoryResult<()>;

    /// Finalize the call with its duration
    async fn end_call(&self, call_id: &CallId, duration_seconds: u64) -> DirectoryResult<()>;
}

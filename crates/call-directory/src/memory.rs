//! In-process Call Directory
//!
//! One store is shared by any number of per-user views created with
//! [`InMemoryCallDirectory::for_user`], so both ends of a call can run in the
//! same process. Reports are recorded for inspection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use callrelay_signaling::{CallId, RoomId, UserId};

use crate::directory::CallDirectory;
use crate::error::{DirectoryError, DirectoryResult};
use crate::types::{CallRecord, CallStatus, UserProfile};

#[derive(Default)]
struct Store {
    calls: Vec<CallRecord>,
    users: HashMap<UserId, UserProfile>,
    joined: Vec<(UserId, CallId)>,
    ended: Vec<(CallId, u64)>,
    fail_reports: bool,
}

impl Store {
    fn call_mut(&mut self, call_id: &CallId) -> DirectoryResult<&mut CallRecord> {
        self.calls
            .iter_mut()
            .find(|c| &c.call_id == call_id)
            .ok_or_else(|| DirectoryError::not_found(format!("call {}", call_id)))
    }
}

/// Call Directory view for one local user over a shared store
#[derive(Clone)]
pub struct InMemoryCallDirectory {
    store: Arc<Mutex<Store>>,
    local: UserId,
}

impl InMemoryCallDirectory {
    pub fn new(local: impl Into<UserId>) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            local: local.into(),
        }
    }

    /// Another user's view of the same store
    pub fn for_user(&self, user: impl Into<UserId>) -> Self {
        Self {
            store: self.store.clone(),
            local: user.into(),
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local
    }

    pub fn insert_call(&self, record: CallRecord) {
        let mut store = self.store.lock();
        store.calls.retain(|c| c.call_id != record.call_id);
        store.calls.push(record);
    }

    pub fn insert_user(&self, profile: UserProfile) {
        self.store.lock().users.insert(profile.id.clone(), profile);
    }

    pub fn call(&self, call_id: &CallId) -> Option<CallRecord> {
        self.store
            .lock()
            .calls
            .iter()
            .find(|c| &c.call_id == call_id)
            .cloned()
    }

    /// Make `mark_joined` and `end_call` fail, to exercise best-effort reporting
    pub fn set_reports_fail(&self, fail: bool) {
        self.store.lock().fail_reports = fail;
    }

    /// Every `mark_joined` received so far, as (user, call)
    pub fn joined_calls(&self) -> Vec<(UserId, CallId)> {
        self.store.lock().joined.clone()
    }

    /// Every `end_call` received so far, as (call, duration seconds)
    pub fn ended_calls(&self) -> Vec<(CallId, u64)> {
        self.store.lock().ended.clone()
    }
}

#[async_trait]
impl CallDirectory for InMemoryCallDirectory {
    async fn create_invitation(&self, receiver_id: &UserId) -> DirectoryResult<CallRecord> {
        let mut store = self.store.lock();

        if !store.users.contains_key(receiver_id) {
            return Err(DirectoryError::not_found(format!("user {}", receiver_id)));
        }
        let duplicate = store.calls.iter().any(|c| {
            c.caller_id == self.local && &c.receiver_id == receiver_id && c.status == CallStatus::Pending
        });
        if duplicate {
            return Err(DirectoryError::status(400, "Already have a pending call with this user"));
        }

        let record = CallRecord::pending(CallId::generate(), self.local.clone(), receiver_id.clone());
        debug!("Created call {} from {} to {}", record.call_id, self.local, receiver_id);
        store.calls.push(record.clone());
        Ok(record)
    }

    async fn accept_call(&self, call_id: &CallId) -> DirectoryResult<CallRecord> {
        let mut store = self.store.lock();
        let local = self.local.clone();
        let call = store.call_mut(call_id)?;

        if call.receiver_id != local {
            return Err(DirectoryError::unauthorized("Not authorized to accept this call"));
        }
        if call.status != CallStatus::Pending {
            return Err(DirectoryError::status(400, format!("Call is already {:?}", call.status)));
        }

        call.status = CallStatus::Accepted;
        call.room_id = Some(RoomId::generate());
        call.start_time = Some(Utc::now().naive_utc());
        Ok(call.clone())
    }

    async fn active_calls(&self) -> DirectoryResult<Vec<CallRecord>> {
        let store = self.store.lock();
        Ok(store
            .calls
            .iter()
            .rev()
            .filter(|c| c.is_participant(&self.local))
            .cloned()
            .collect())
    }

    async fn find_call(&self, call_id: &CallId) -> DirectoryResult<CallRecord> {
        self.call(call_id)
            .filter(|c| c.is_participant(&self.local))
            .ok_or_else(|| DirectoryError::not_found(format!("call {}", call_id)))
    }

    async fn user_profile(&self, user_id: &UserId) -> DirectoryResult<UserProfile> {
        self.store
            .lock()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::not_found(format!("user {}", user_id)))
    }

    async fn mark_joined(&self, call_id: &CallId) -> DirectoryResult<()> {
        let mut store = self.store.lock();
        if store.fail_reports {
            return Err(DirectoryError::status(503, "directory unavailable"));
        }
        store.call_mut(call_id)?;
        store.joined.push((self.local.clone(), call_id.clone()));
        Ok(())
    }

    async fn end_call(&self, call_id: &CallId, duration_seconds: u64) -> DirectoryResult<()> {
        let mut store = self.store.lock();
        if store.fail_reports {
            return Err(DirectoryError::status(503, "directory unavailable"));
        }
        let local = self.local.clone();
        let call = store.call_mut(call_id)?;
        if !call.is_participant(&local) {
            return Err(DirectoryError::unauthorized("Not authorized to end this call"));
        }
        call.status = CallStatus::Completed;
        call.end_time = Some(Utc::now().naive_utc());
        call.duration_seconds = Some(duration_seconds);
        store.ended.push((call_id.clone(), duration_seconds));
        Ok(())
    }
}

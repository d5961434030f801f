//! Call Directory records

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use callrelay_signaling::{CallId, RoomId, UserId};

/// Directory-side status of a call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Accepted,
    Completed,
    Rejected,
    Missed,
    #[serde(other)]
    Unknown,
}

impl CallStatus {
    /// Whether a session may still be established for this record
    pub fn is_open(&self) -> bool {
        matches!(self, CallStatus::Pending | CallStatus::Accepted)
    }
}

/// One call record as stored by the Call Directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    #[serde(rename = "id")]
    pub call_id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub status: CallStatus,
    #[serde(rename = "jitsi_room_id", alias = "room_id", default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub start_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

impl CallRecord {
    /// A fresh pending record
    pub fn pending(call_id: CallId, caller_id: UserId, receiver_id: UserId) -> Self {
        Self {
            call_id,
            caller_id,
            receiver_id,
            status: CallStatus::Pending,
            room_id: None,
            start_time: None,
            end_time: None,
            duration_seconds: None,
            created_at: Some(chrono::Utc::now().naive_utc()),
        }
    }

    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        &self.caller_id == user || &self.receiver_id == user
    }

    /// The other participant, if `user` is one of the two
    pub fn partner_of(&self, user: &UserId) -> Option<&UserId> {
        if &self.caller_id == user {
            Some(&self.receiver_id)
        } else if &self.receiver_id == user {
            Some(&self.caller_id)
        } else {
            None
        }
    }
}

/// Public profile of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
}

impl UserProfile {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            is_online: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_directory_payload() {
        let raw = r#"{
            "id": "65a1f0c2e4b0a1b2c3d4e5f6",
            "caller_id": "alice",
            "receiver_id": "bob",
            "status": "accepted",
            "jitsi_room_id": "english-comm-0f3c",
            "start_time": "2024-03-01T10:15:30.123456",
            "end_time": null,
            "duration_seconds": null,
            "created_at": "2024-03-01T10:15:00"
        }"#;

        let record: CallRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.call_id.as_str(), "65a1f0c2e4b0a1b2c3d4e5f6");
        assert_eq!(record.status, CallStatus::Accepted);
        assert_eq!(record.room_id, Some(RoomId::from("english-comm-0f3c")));
        assert!(record.start_time.is_some());
        assert!(record.end_time.is_none());
    }

    #[test]
    fn unknown_status_and_missing_optionals_are_tolerated() {
        let raw = r#"{"id":"1","caller_id":"a","receiver_id":"b","status":"ringing"}"#;
        let record: CallRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.status, CallStatus::Unknown);
        assert!(!record.status.is_open());
        assert!(record.room_id.is_none());
    }

    #[test]
    fn partner_lookup() {
        let record = CallRecord::pending("1".into(), "a".into(), "b".into());
        assert_eq!(record.partner_of(&"a".into()), Some(&UserId::from("b")));
        assert_eq!(record.partner_of(&"b".into()), Some(&UserId::from("a")));
        assert_eq!(record.partner_of(&"c".into()), None);
        assert!(!record.is_participant(&"c".into()));
    }

    #[test]
    fn profile_accepts_mongo_style_id() {
        let profile: UserProfile = serde_json::from_str(r#"{"_id":"u1","name":"Ana"}"#).unwrap();
        assert_eq!(profile.id, UserId::from("u1"));
        assert_eq!(profile.name, "Ana");
    }
}

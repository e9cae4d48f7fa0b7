//! Cached note data model shared by the repository, the queue, and the driver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A note's identifier: either a server-assigned integer or a locally minted
/// temporary id (`offline_<uuid>`) waiting to be replaced by the server's id.
///
/// Serializes as the server would send it: a bare integer for `Server`, the
/// `offline_` string for `Temp`. This mirrors the wire shape exactly so the
/// cache and the queue can round-trip payloads without a translation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NoteId {
    Server(i64),
    Temp(String),
}

impl NoteId {
    pub fn new_temp() -> Self {
        NoteId::Temp(format!("offline_{}", uuid::Uuid::new_v4()))
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, NoteId::Temp(_))
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteId::Server(id) => write!(f, "{id}"),
            NoteId::Temp(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for NoteId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<i64>() {
            Ok(NoteId::Server(n))
        } else {
            Ok(NoteId::Temp(s.to_string()))
        }
    }
}

impl Serialize for NoteId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            NoteId::Server(id) => serializer.serialize_i64(*id),
            NoteId::Temp(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for NoteId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Str(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Int(n) => NoteId::Server(n),
            Repr::Str(s) => s.parse().unwrap(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioRecording {
    pub id: String,
    pub url: String,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Drawing {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub remind_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    pub color: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub is_pinned: bool,
    pub is_archived: bool,
    pub is_deleted: bool,
    #[serde(default)]
    pub checklist_items: Vec<ChecklistItem>,
    #[serde(default)]
    pub labels: Vec<LabelRef>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub audio_recordings: Vec<AudioRecording>,
    #[serde(default)]
    pub drawings: Vec<Drawing>,
    #[serde(default)]
    pub reminder: Option<Reminder>,
    /// Local file URI for an audio recording still waiting on its upload op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_uri: Option<String>,
    /// Local file URI for a drawing still waiting on its upload op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing_uri: Option<String>,
}

/// A note plus the bookkeeping the cache repository needs: whether the copy
/// has local edits not yet confirmed by the server, and when it last was.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedNote {
    pub id: NoteId,
    pub data: Note,
    pub locally_modified: bool,
    #[serde(default)]
    pub last_synced_at: Option<String>,
}

impl CachedNote {
    pub fn new_local(data: Note) -> Self {
        Self {
            id: data.id.clone(),
            data,
            locally_modified: true,
            last_synced_at: None,
        }
    }

    pub fn from_server(data: Note, synced_at: impl Into<String>) -> Self {
        Self {
            id: data.id.clone(),
            data,
            locally_modified: false,
            last_synced_at: Some(synced_at.into()),
        }
    }
}

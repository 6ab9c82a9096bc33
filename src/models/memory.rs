//! Memory node models.
//!
//! A memory is a graph node: chat sessions, finalized history messages,
//! streamed partial fragments, roles, categories, entities and tools are
//! all memories, discriminated by kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Node kind enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Session,
    History,
    Partial,
    Role,
    Category,
    Entity,
    Tool,
    Custom(String),
}

impl MemoryKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Session => "session",
            Self::History => "history",
            Self::Partial => "partial",
            Self::Role => "role",
            Self::Category => "category",
            Self::Entity => "entity",
            Self::Tool => "tool",
            Self::Custom(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "session" => Self::Session,
            "history" => Self::History,
            "partial" => Self::Partial,
            "role" => Self::Role,
            "category" => Self::Category,
            "entity" => Self::Entity,
            "tool" => Self::Tool,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Kinds that represent chat messages and therefore require a role.
    pub fn is_message(&self) -> bool {
        matches!(self, Self::History | Self::Partial)
    }
}

/// Message role. Closed set; anything else is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// A tool invocation recorded on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: ToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub arguments: Value,
}

/// Typed view over a memory's open metadata map.
///
/// Known keys are validated at the boundary; unknown keys ride along in
/// `extra` untouched so older rows and newer writers keep working.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    /// Parent session id, present on forked sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_from: Option<String>,
    /// Id of the last message inherited from the parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl MessageMeta {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Memory record from the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub kind: String,
    pub content: String,
    pub metadata: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl Memory {
    /// Get the node kind as enum.
    pub fn kind_enum(&self) -> MemoryKind {
        MemoryKind::from_str(&self.kind)
    }

    /// Parse the metadata column. Rows written by older revisions may
    /// carry anything; unreadable metadata degrades to the empty map.
    pub fn meta(&self) -> MessageMeta {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A materialized chat message, ready for submission to a model.
///
/// Optional fields are omitted from JSON when absent, matching what chat
/// front ends and LLM clients expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl ChatMessage {
    /// A message with no content, no tool calls, no images and no done
    /// flag is a streaming artifact, not conversation.
    pub fn is_blank(&self) -> bool {
        self.content.is_empty()
            && self.done.is_none()
            && self.tool_calls.as_ref().map_or(true, |t| t.is_empty())
            && self.images.as_ref().map_or(true, |i| i.is_empty())
    }
}

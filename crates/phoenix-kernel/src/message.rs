//! Agent 通信消息
//! Agent communication message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 投递给 Agent 的消息
/// Message delivered to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// 消息 ID
    /// Message id
    pub id: String,
    /// 发送方
    /// Sender
    pub sender: String,
    /// 接收方 Agent 名称
    /// Recipient agent name
    pub recipient: String,
    /// 消息负载
    /// Payload
    pub payload: serde_json::Value,
    /// 创建时间
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    /// 创建新消息
    /// Create a new message
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// 创建纯文本消息
    /// Create a text message
    pub fn text(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(sender, recipient, serde_json::Value::String(text.into()))
    }

    /// 以文本形式读取负载
    /// Read the payload as text
    pub fn as_text(&self) -> Option<&str> {
        self.payload.as_str()
    }
}

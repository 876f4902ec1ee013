//! Domain types (§3 Data model)

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Direct = 1,
    Group = 2,
}

impl ChatType {
    pub fn from_i16(v: i16) -> Self {
        match v {
            1 => ChatType::Direct,
            _ => ChatType::Group,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin = 1,
    Member = 2,
}

impl Role {
    pub fn from_i16(v: i16) -> Self {
        match v {
            1 => Role::Admin,
            _ => Role::Member,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReceiptStatus {
    Sent = 1,
    Delivered = 2,
    Read = 3,
}

impl ReceiptStatus {
    pub fn from_i16(v: i16) -> Self {
        match v {
            1 => ReceiptStatus::Sent,
            2 => ReceiptStatus::Delivered,
            _ => ReceiptStatus::Read,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: i64,
    pub chat_type: ChatType,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMember {
    pub chat_id: i64,
    pub user_id: i64,
    pub role: Role,
    pub last_read_msg_id: i64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub media_ref: Option<String>,
    pub reply_to_msg_id: Option<i64>,
    pub client_uuid: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub message_id: i64,
    pub user_id: i64,
    pub status: ReceiptStatus,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceToken {
    pub user_id: i64,
    pub token: String,
    pub platform: String,
    pub updated_at: DateTime<Utc>,
}

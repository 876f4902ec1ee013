//! Repository layer: Postgres connection management plus the chat/message/
//! membership/receipt/device-token repository (§6.2).

mod error;
mod models;
mod postgres;
mod repo;

pub use error::RepoError;
pub use models::{Chat, ChatMember, ChatType, DeviceToken, Message, Receipt, ReceiptStatus, Role};
pub use postgres::{PostgresConfig, PostgresService};
pub use repo::ChatRepository;

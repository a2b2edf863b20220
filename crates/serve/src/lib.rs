//! Read-through orchestration over the projection services, plus the
//! group membership RPCs that drive the key-rotation engine. The
//! embedding node supplies the transport, crypto, and block-clock
//! ports; this crate supplies everything between them and the stores.

pub mod api;
mod app;
mod config;
mod devices;
mod error;
mod feeds;
mod groups;
mod messages;
mod names;
mod store;
mod watermarks;

pub use app::App;
pub use config::Settings;
pub use devices::DeviceService;
pub use error::{with_deadline, ApiError};
pub use feeds::{FeedRecord, FeedService};
pub use groups::{
    CreateGroupRequest, GroupService, KeyGenerationRecord, MutationReply, NewParticipant,
    DESCRIPTION_MAX_CHARS, TITLE_MAX_CHARS,
};
pub use messages::{MessageRecord, MessageService, MessagesReply};
pub use store::{PgSyncStore, SyncStore};
pub use watermarks::{SetReadPositionReply, WatermarkService};

//! # Music Module
//!
//! Per-guild playback core.
//!
//! ## Components
//!
//! - [`item`]: queue entries and the tag attached to the playing resource
//! - [`session`]: the playback session state machine
//! - [`manager`]: capacity/permission gate and session lifecycle per guild
//! - [`registry`]: managers keyed by guild
//!
//! ```text
//! dispatch ──play──▶ GuildMusicManager ──enqueue──▶ PlaybackSession ──▶ OutputPlayer
//!                         │                              ▲
//!                         └──open_connection──▶ VoiceTransport (events)
//! ```

pub mod error;
pub mod item;
pub mod manager;
pub mod registry;
pub mod session;

pub use error::{PlayError, SessionError};
pub use item::{QueueItem, Requester};
pub use manager::{ChannelOccupancy, GuildMusicManager, MusicServices, QueuedBatch, VoiceChannelRef};
pub use registry::GuildRegistry;
pub use session::{PlaybackSession, SessionSettings, SessionSnapshot};

//! # Audio Module
//!
//! Per-guild playback orchestration.
//!
//! - [`state`]: guild → state registry and the two per-guild locks
//! - [`queue`]: FIFO queue plus now-playing
//! - [`voice`]: voice seam traits and the connect/retry/move policy
//! - [`player`]: the playback state machine and completion events
//! - [`idle`]: idle disconnect timer
//! - [`transcoder`]: songbird + ffmpeg implementation of the voice seam
//!
//! Lock order when both are needed: `connection`, then `playback`. Nothing
//! holds `playback` while waiting for `connection`.

pub mod idle;
pub mod player;
pub mod queue;
pub mod state;
pub mod transcoder;
pub mod voice;

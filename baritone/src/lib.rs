//! Conversions between hUGEDriver songs, the C source the driver is built from, and JSON.
//!
//! - [`export::to_c`] writes a song as C, with identical patterns only emitted once;
//! - [`recompose::from_c`] reads such C back into a song (only the playback-relevant content
//!   survives the trip, not the slot numbering);
//! - [`persist::to_json`] and [`persist::from_json`] round-trip a song exactly.

pub mod dedup;
pub mod export;
pub mod matcher;
pub mod persist;
pub mod recompose;
pub mod registers;
pub mod song;

pub use export::{emit, to_c, Emission};
pub use persist::{from_json, to_json, PersistError};
pub use recompose::{from_c, recompose_into, RecomposeError};
pub use song::{Cell, EffectId, InvalidSong, Note, Pattern, Song};

pub const NB_CHANNELS: usize = 4;
pub const PATTERN_LENGTH: usize = 64;
/// How many patterns each channel can store.
pub const ORDER_BANK_SIZE: usize = 128;
/// The longest sequence the driver can play: `order_cnt` is twice this, and must fit in a byte.
pub const MAX_SEQUENCE_LEN: usize = 127;
pub const INSTRUMENTS_PER_KIND: usize = 15;
pub const NB_WAVES: usize = 16;
pub const WAVE_SAMPLES: usize = 32;
/// The "no note" pitch code.
pub const LAST_NOTE: u8 = 72;

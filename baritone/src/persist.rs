//! Lossless JSON storage for [`Song`]s.
//!
//! Unlike the C export, this keeps everything: slot numbering, unused patterns, and instrument names.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    song::{
        is_empty_pattern, DutyInstrument, InstrumentBank, NoiseInstrument, Pattern, Song,
        WaveBank, WaveInstrument, BLANK_PATTERN,
    },
    Cell, NB_CHANNELS, ORDER_BANK_SIZE, PATTERN_LENGTH,
};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Malformed song JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{what}` has {len} entries, but {expected} were expected")]
    WrongLength {
        what: String,
        len: usize,
        expected: usize,
    },
    #[error("Channel {} references slot {slot}, but there are only {} slots", .channel + 1, ORDER_BANK_SIZE)]
    SlotOutOfRange { channel: usize, slot: u8 },
}

/// The on-disk shape of a song.
#[derive(Debug, Serialize, Deserialize)]
struct SongRecord {
    name: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    comment: String,
    duty_instruments: InstrumentBank<DutyInstrument>,
    wave_instruments: InstrumentBank<WaveInstrument>,
    noise_instruments: InstrumentBank<NoiseInstrument>,
    waves: WaveBank,
    ticks_per_row: u8,
    /// One bank per channel; blank patterns are stored as `null`.
    orders: Vec<Vec<Option<Vec<Cell>>>>,
    channels: Vec<Vec<u8>>,
}

impl From<&Song> for SongRecord {
    fn from(song: &Song) -> Self {
        Self {
            name: song.name.clone(),
            artist: song.artist.clone(),
            comment: song.comment.clone(),
            duty_instruments: song.duty_instruments.clone(),
            wave_instruments: song.wave_instruments.clone(),
            noise_instruments: song.noise_instruments.clone(),
            waves: song.waves,
            ticks_per_row: song.ticks_per_row,
            orders: song
                .orders
                .iter()
                .map(|bank| {
                    bank.iter()
                        .map(|pattern| (!is_empty_pattern(pattern)).then(|| pattern.to_vec()))
                        .collect()
                })
                .collect(),
            channels: song.channels.to_vec(),
        }
    }
}

impl TryFrom<SongRecord> for Song {
    type Error = PersistError;

    fn try_from(record: SongRecord) -> Result<Self, Self::Error> {
        check_len("orders", record.orders.len(), NB_CHANNELS)?;
        check_len("channels", record.channels.len(), NB_CHANNELS)?;

        let mut song = Song {
            name: record.name,
            artist: record.artist,
            comment: record.comment,
            duty_instruments: record.duty_instruments,
            wave_instruments: record.wave_instruments,
            noise_instruments: record.noise_instruments,
            waves: record.waves,
            ticks_per_row: record.ticks_per_row,
            ..Default::default()
        };

        for (channel, bank) in record.orders.into_iter().enumerate() {
            check_len(
                &format!("orders[{channel}]"),
                bank.len(),
                ORDER_BANK_SIZE,
            )?;
            for (slot, cells) in bank.into_iter().enumerate() {
                song.orders[channel][slot] = match cells {
                    None => BLANK_PATTERN,
                    Some(cells) => to_pattern(cells, channel, slot)?,
                };
            }
        }

        for (channel, sequence) in record.channels.into_iter().enumerate() {
            if let Some(&slot) = sequence
                .iter()
                .find(|&&slot| usize::from(slot) >= ORDER_BANK_SIZE)
            {
                return Err(PersistError::SlotOutOfRange { channel, slot });
            }
            song.channels[channel] = sequence;
        }

        Ok(song)
    }
}

fn check_len(what: &str, len: usize, expected: usize) -> Result<(), PersistError> {
    if len == expected {
        Ok(())
    } else {
        Err(PersistError::WrongLength {
            what: what.to_owned(),
            len,
            expected,
        })
    }
}

fn to_pattern(cells: Vec<Cell>, channel: usize, slot: usize) -> Result<Pattern, PersistError> {
    let len = cells.len();
    Pattern::try_from(cells).map_err(|_| PersistError::WrongLength {
        what: format!("orders[{channel}][{slot}]"),
        len,
        expected: PATTERN_LENGTH,
    })
}

pub fn to_json(song: &Song) -> Result<String, PersistError> {
    let text = serde_json::to_string_pretty(&SongRecord::from(song))?;
    info!("Saved \"{}\" as {} bytes of JSON", song.name, text.len());
    Ok(text)
}

pub fn from_json(text: &str) -> Result<Song, PersistError> {
    let record: SongRecord = serde_json::from_str(text)?;
    let song = Song::try_from(record)?;
    info!("Loaded \"{}\" from JSON", song.name);
    Ok(song)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{EffectId, LfsrWidth, Note};
    use pretty_assertions::assert_eq;
    use std::num::NonZeroU8;

    fn busy_song() -> Song {
        let mut song = Song::default();
        song.name = "Cave".into();
        song.artist = "Someone".into();
        song.comment = "Loops at order 1".into();
        song.ticks_per_row = 4;
        song.channels = [vec![0, 9], vec![1, 1], vec![127, 0], vec![0, 0]];
        song.orders[0][9][32] = Cell::new(Note::GSharp4, 4, EffectId::NoteDelay, 2);
        song.orders[2][127][0] = Cell::new(Note::C_3, 15, EffectId::SetTempo, 0xFF);
        // Unreferenced slots are kept as well.
        song.orders[3][50][63] = Cell::new(Note::B_8, 1, EffectId::Arpeggio, 0x37);
        song.duty_instruments[2].name = "Lead".into();
        song.duty_instruments[2].length = NonZeroU8::new(20);
        song.wave_instruments[0].length = Some(0);
        song.noise_instruments[14].lfsr_width = LfsrWidth::Seven;
        song.noise_instruments[14].modulation = [-3, 0, 7, 1, 0, -32];
        song.waves[15] = std::array::from_fn(|i| (i % 16) as u8);
        song
    }

    #[test]
    fn exact_round_trip() {
        let song = busy_song();
        let text = to_json(&song).unwrap();
        assert_eq!(from_json(&text).unwrap(), song);
    }

    #[test]
    fn blank_patterns_are_null() {
        let text = to_json(&Song::default()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["orders"][0][0], serde_json::Value::Null);
        assert_eq!(value["orders"].as_array().unwrap().len(), 4);
        assert_eq!(value["orders"][1].as_array().unwrap().len(), 128);
    }

    #[test]
    fn cells_use_note_names() {
        let text = to_json(&busy_song()).unwrap();
        assert!(text.contains("\"note\": \"Gs4\""));
    }

    #[test]
    fn malformed_records() {
        let mut value = serde_json::to_value(SongRecord::from(&Song::default())).unwrap();
        value["channels"] = serde_json::json!([[], [], []]);
        assert!(matches!(
            from_json(&value.to_string()),
            Err(PersistError::WrongLength { len: 3, expected: 4, .. })
        ));

        value["channels"] = serde_json::json!([[], [200], [], []]);
        assert!(matches!(
            from_json(&value.to_string()),
            Err(PersistError::SlotOutOfRange {
                channel: 1,
                slot: 200
            })
        ));

        value["channels"] = serde_json::json!([[], [], [], []]);
        value["orders"][2][5] = serde_json::to_value(vec![Cell::BLANK; 3]).unwrap();
        match from_json(&value.to_string()) {
            Err(PersistError::WrongLength { what, len, .. }) => {
                assert_eq!(what, "orders[2][5]");
                assert_eq!(len, 3);
            }
            other => panic!("Expected a length error, got {other:?}"),
        }

        assert!(matches!(from_json("{"), Err(PersistError::Json(_))));
    }
}

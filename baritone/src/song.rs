use std::{
    cmp::Ordering,
    collections::{hash_map::DefaultHasher, BTreeSet},
    fmt::Display,
    hash::{Hash, Hasher},
    num::NonZeroU8,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    registers::RangeError, INSTRUMENTS_PER_KIND, MAX_SEQUENCE_LEN, NB_CHANNELS, NB_WAVES,
    ORDER_BANK_SIZE, PATTERN_LENGTH, WAVE_SAMPLES,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub name: String,
    pub artist: String,
    pub comment: String,

    pub duty_instruments: InstrumentBank<DutyInstrument>,
    pub wave_instruments: InstrumentBank<WaveInstrument>,
    pub noise_instruments: InstrumentBank<NoiseInstrument>,
    pub waves: WaveBank,

    pub ticks_per_row: u8,

    /// Pattern storage, addressed by slot. This is *not* the playback order.
    pub orders: [OrderBank; NB_CHANNELS],
    /// Playback order: slot indices into the corresponding `orders` bank.
    /// All four must be the same length, since the channels advance in lockstep.
    pub channels: [Vec<u8>; NB_CHANNELS],
}

pub type InstrumentBank<T> = [T; INSTRUMENTS_PER_KIND];

pub type Wave = [u8; WAVE_SAMPLES];

pub type WaveBank = [Wave; NB_WAVES];

pub type Pattern = [Cell; PATTERN_LENGTH];

pub type OrderBank = Box<[Pattern; ORDER_BANK_SIZE]>;

pub const BLANK_PATTERN: Pattern = [Cell::BLANK; PATTERN_LENGTH];

pub fn is_empty_pattern(pattern: &Pattern) -> bool {
    pattern.iter().all(Cell::is_blank)
}

pub fn blank_order_bank() -> OrderBank {
    Box::new([BLANK_PATTERN; ORDER_BANK_SIZE])
}

impl Default for Song {
    fn default() -> Self {
        Self {
            name: String::new(),
            artist: String::new(),
            comment: String::new(),
            duty_instruments: Default::default(),
            wave_instruments: Default::default(),
            noise_instruments: Default::default(),
            waves: [[0; WAVE_SAMPLES]; NB_WAVES],
            ticks_per_row: 7,
            orders: std::array::from_fn(|_| blank_order_bank()),
            channels: Default::default(),
        }
    }
}

/// Everything but the display name, in declaration order.
type SongContent<'song> = (
    &'song str,
    &'song str,
    &'song InstrumentBank<DutyInstrument>,
    &'song InstrumentBank<WaveInstrument>,
    &'song InstrumentBank<NoiseInstrument>,
    &'song WaveBank,
    u8,
    &'song [OrderBank; NB_CHANNELS],
    &'song [Vec<u8>; NB_CHANNELS],
);

impl Song {
    pub fn instrument_count(&self) -> usize {
        self.duty_instruments.len() + self.wave_instruments.len() + self.noise_instruments.len()
    }

    /// Looks up an instrument in the flat index space (duty, then wave, then noise).
    pub fn instrument_at(&self, index: usize) -> Option<InstrumentRef<'_>> {
        const N: usize = INSTRUMENTS_PER_KIND;
        match index {
            0..=14 => Some(InstrumentRef::Duty(&self.duty_instruments[index])),
            15..=29 => Some(InstrumentRef::Wave(&self.wave_instruments[index - N])),
            30..=44 => Some(InstrumentRef::Noise(&self.noise_instruments[index - 2 * N])),
            _ => None,
        }
    }

    /// The set of slots each channel's sequence actually references.
    pub fn order_matrix(&self) -> [BTreeSet<u8>; NB_CHANNELS] {
        std::array::from_fn(|ch| self.channels[ch].iter().copied().collect())
    }

    pub fn sequence_len(&self) -> usize {
        self.channels.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// The pattern played by `channel` at sequence position `order`, if there is one.
    pub fn pattern_at(&self, channel: usize, order: usize) -> Option<&Pattern> {
        let slot = *self.channels.get(channel)?.get(order)?;
        self.orders[channel].get(usize::from(slot))
    }

    /// Returns the last position holding a non-blank cell, or the zero position if the song is
    /// entirely blank.
    pub fn find_stop(&self) -> SongPosition {
        let mut stop = SongPosition::default();
        for order in 0..self.sequence_len() {
            for row in 0..PATTERN_LENGTH {
                for channel in 0..NB_CHANNELS {
                    let Some(pattern) = self.pattern_at(channel, order) else {
                        continue;
                    };
                    if !pattern[row].is_blank() {
                        stop = SongPosition { order, row };
                    }
                }
            }
        }
        stop
    }

    fn content(&self) -> SongContent<'_> {
        (
            &self.artist,
            &self.comment,
            &self.duty_instruments,
            &self.wave_instruments,
            &self.noise_instruments,
            &self.waves,
            self.ticks_per_row,
            &self.orders,
            &self.channels,
        )
    }

    /// Structural hash over every field; the display name only counts if `count_name` is set.
    pub fn content_hash(&self, count_name: bool) -> u64 {
        let mut hasher = DefaultHasher::new();
        if count_name {
            self.name.hash(&mut hasher);
        }
        self.content().hash(&mut hasher);
        hasher.finish()
    }

    /// Structural total ordering; two songs differing only by name compare equal unless
    /// `count_name` is set.
    pub fn compare(&self, other: &Self, count_name: bool) -> Ordering {
        let by_name = if count_name {
            self.name.cmp(&other.name)
        } else {
            Ordering::Equal
        };
        by_name.then_with(|| self.content().cmp(&other.content()))
    }

    /// Checks every invariant that the C export relies on.
    pub fn validate(&self) -> Result<(), InvalidSong> {
        let lens: [usize; NB_CHANNELS] = std::array::from_fn(|ch| self.channels[ch].len());
        if lens.iter().any(|&len| len != lens[0]) {
            return Err(InvalidSong::UnevenSequences(lens));
        }
        if lens[0] == 0 {
            return Err(InvalidSong::EmptySequences);
        }
        if lens[0] > MAX_SEQUENCE_LEN {
            return Err(InvalidSong::SequenceTooLong(lens[0]));
        }
        for (channel, sequence) in self.channels.iter().enumerate() {
            if let Some((position, &slot)) = sequence
                .iter()
                .enumerate()
                .find(|(_, &slot)| usize::from(slot) >= ORDER_BANK_SIZE)
            {
                return Err(InvalidSong::SlotOutOfRange {
                    channel,
                    position,
                    slot,
                });
            }
        }

        let instr_err = |kind: InstrKind, index: usize| {
            move |source: RangeError| InvalidSong::Instrument {
                kind,
                index,
                source,
            }
        };
        for (i, instr) in self.duty_instruments.iter().enumerate() {
            instr.to_bytes().map_err(instr_err(InstrKind::Duty, i))?;
        }
        for (i, instr) in self.wave_instruments.iter().enumerate() {
            instr.to_bytes().map_err(instr_err(InstrKind::Wave, i))?;
        }
        for (i, instr) in self.noise_instruments.iter().enumerate() {
            instr.to_bytes().map_err(instr_err(InstrKind::Noise, i))?;
        }
        for (index, wave) in self.waves.iter().enumerate() {
            crate::registers::pack_wave(wave)
                .map_err(|source| InvalidSong::Wave { index, source })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SongPosition {
    pub order: usize,
    pub row: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSong {
    #[error("Channel sequences differ in length ({0:?}); all four must match")]
    UnevenSequences([usize; NB_CHANNELS]),
    /// C can't declare the empty order arrays this would need.
    #[error("The song has no orders; it must be at least one order long")]
    EmptySequences,
    #[error("The song is {0} orders long, but at most {} are supported", MAX_SEQUENCE_LEN)]
    SequenceTooLong(usize),
    #[error("Channel {} references slot {slot} at order {position}, but there are only {} slots", .channel + 1, ORDER_BANK_SIZE)]
    SlotOutOfRange {
        channel: usize,
        position: usize,
        slot: u8,
    },
    #[error("{kind} instrument {index}: {source}")]
    Instrument {
        kind: InstrKind,
        index: usize,
        #[source]
        source: RangeError,
    },
    #[error("Wave {index}: {source}")]
    Wave {
        index: usize,
        #[source]
        source: RangeError,
    },
}

// Instruments.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrKind {
    Duty,
    Wave,
    Noise,
}

impl Display for InstrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duty => write!(f, "Duty"),
            Self::Wave => write!(f, "Wave"),
            Self::Noise => write!(f, "Noise"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentRef<'song> {
    Duty(&'song DutyInstrument),
    Wave(&'song WaveInstrument),
    Noise(&'song NoiseInstrument),
}

impl InstrumentRef<'_> {
    pub fn kind(&self) -> InstrKind {
        match self {
            Self::Duty(_) => InstrKind::Duty,
            Self::Wave(_) => InstrKind::Wave,
            Self::Noise(_) => InstrKind::Noise,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Duty(instr) => &instr.name,
            Self::Wave(instr) => &instr.name,
            Self::Noise(instr) => &instr.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DutyInstrument {
    pub name: String,
    /// `None` sustains indefinitely; otherwise, the note is cut after this many ticks (1..=64).
    pub length: Option<NonZeroU8>,
    /// 0..=7
    pub sweep_time: u8,
    /// -7..=7
    pub sweep_shift: i8,
    pub duty: DutyType,
    /// 0..=15
    pub initial_volume: u8,
    /// -7..=7; positive values make the volume go up.
    pub envelope_step: i8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WaveInstrument {
    pub name: String,
    /// Written to NR31 verbatim.
    pub length: Option<u8>,
    pub output_level: WaveOutputLevel,
    /// 0..=15
    pub wave_index: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoiseInstrument {
    pub name: String,
    /// Same semantics as the duty instruments' length.
    pub length: Option<NonZeroU8>,
    /// 0..=15
    pub initial_volume: u8,
    /// -7..=7
    pub envelope_step: i8,
    pub lfsr_width: LfsrWidth,
    /// Opaque to us; the driver applies it to the noise register every tick.
    pub modulation: [i8; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum DutyType {
    Percent12_5,
    Percent25,
    #[default]
    Percent50,
    Percent75,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum WaveOutputLevel {
    Mute,
    #[default]
    Full,
    Half,
    Quarter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LfsrWidth {
    #[default]
    Fifteen,
    Seven,
}

// Patterns.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub note: Note,
    pub instrument: u8,
    pub effect_code: EffectId,
    pub effect_param: u8,
}

impl Cell {
    pub const BLANK: Self = Self {
        note: Note::None,
        instrument: 0,
        effect_code: EffectId::Arpeggio,
        effect_param: 0,
    };

    pub const fn new(note: Note, instrument: u8, effect_code: EffectId, effect_param: u8) -> Self {
        Self {
            note,
            instrument,
            effect_code,
            effect_param,
        }
    }

    pub fn is_blank(&self) -> bool {
        *self == Self::BLANK
    }

    /// The effect column as the driver sees it: `0xEPP`.
    pub fn effect_word(&self) -> u16 {
        u16::from(u8::from(self.effect_code)) << 8 | u16::from(self.effect_param)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EffectId {
    #[default]
    Arpeggio,
    PortaUp,
    PortaDown,
    TonePorta,
    Vibrato,
    SetMasterVol,
    CallRoutine,
    NoteDelay,
    SetPanning,
    ChangeTimbre,
    VolSlide,
    PosJump,
    SetVol,
    PatternBreak,
    NoteCut,
    SetTempo,
}

impl EffectId {
    const ALL: [Self; 16] = [
        Self::Arpeggio,
        Self::PortaUp,
        Self::PortaDown,
        Self::TonePorta,
        Self::Vibrato,
        Self::SetMasterVol,
        Self::CallRoutine,
        Self::NoteDelay,
        Self::SetPanning,
        Self::ChangeTimbre,
        Self::VolSlide,
        Self::PosJump,
        Self::SetVol,
        Self::PatternBreak,
        Self::NoteCut,
        Self::SetTempo,
    ];
}

impl From<EffectId> for u8 {
    fn from(value: EffectId) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for EffectId {
    type Error = BadEffectCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(BadEffectCode(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Effect code out of range (0x{0:02x})")]
pub struct BadEffectCode(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
#[allow(non_camel_case_types)] // We're trying to mirror the driver's constants' names.
pub enum Note {
    C_3,
    CSharp3,
    D_3,
    DSharp3,
    E_3,
    F_3,
    FSharp3,
    G_3,
    GSharp3,
    A_3,
    ASharp3,
    B_3,
    C_4,
    CSharp4,
    D_4,
    DSharp4,
    E_4,
    F_4,
    FSharp4,
    G_4,
    GSharp4,
    A_4,
    ASharp4,
    B_4,
    C_5,
    CSharp5,
    D_5,
    DSharp5,
    E_5,
    F_5,
    FSharp5,
    G_5,
    GSharp5,
    A_5,
    ASharp5,
    B_5,
    C_6,
    CSharp6,
    D_6,
    DSharp6,
    E_6,
    F_6,
    FSharp6,
    G_6,
    GSharp6,
    A_6,
    ASharp6,
    B_6,
    C_7,
    CSharp7,
    D_7,
    DSharp7,
    E_7,
    F_7,
    FSharp7,
    G_7,
    GSharp7,
    A_7,
    ASharp7,
    B_7,
    C_8,
    CSharp8,
    D_8,
    DSharp8,
    E_8,
    F_8,
    FSharp8,
    G_8,
    GSharp8,
    A_8,
    ASharp8,
    B_8,
    #[default]
    None,
}

/// The driver's mnemonics, indexed by `Note as usize`.
const NOTE_NAMES: [&str; 73] = [
    "C_3", "Cs3", "D_3", "Ds3", "E_3", "F_3", "Fs3", "G_3", "Gs3", "A_3", "As3", "B_3", //
    "C_4", "Cs4", "D_4", "Ds4", "E_4", "F_4", "Fs4", "G_4", "Gs4", "A_4", "As4", "B_4", //
    "C_5", "Cs5", "D_5", "Ds5", "E_5", "F_5", "Fs5", "G_5", "Gs5", "A_5", "As5", "B_5", //
    "C_6", "Cs6", "D_6", "Ds6", "E_6", "F_6", "Fs6", "G_6", "Gs6", "A_6", "As6", "B_6", //
    "C_7", "Cs7", "D_7", "Ds7", "E_7", "F_7", "Fs7", "G_7", "Gs7", "A_7", "As7", "B_7", //
    "C_8", "Cs8", "D_8", "Ds8", "E_8", "F_8", "Fs8", "G_8", "Gs8", "A_8", "As8", "B_8", //
    "___",
];

impl Note {
    const ALL: [Self; 73] = {
        use Note::*;
        [
            C_3, CSharp3, D_3, DSharp3, E_3, F_3, FSharp3, G_3, GSharp3, A_3, ASharp3, B_3, //
            C_4, CSharp4, D_4, DSharp4, E_4, F_4, FSharp4, G_4, GSharp4, A_4, ASharp4, B_4, //
            C_5, CSharp5, D_5, DSharp5, E_5, F_5, FSharp5, G_5, GSharp5, A_5, ASharp5, B_5, //
            C_6, CSharp6, D_6, DSharp6, E_6, F_6, FSharp6, G_6, GSharp6, A_6, ASharp6, B_6, //
            C_7, CSharp7, D_7, DSharp7, E_7, F_7, FSharp7, G_7, GSharp7, A_7, ASharp7, B_7, //
            C_8, CSharp8, D_8, DSharp8, E_8, F_8, FSharp8, G_8, GSharp8, A_8, ASharp8, B_8, //
            None,
        ]
    };

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self as usize]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        NOTE_NAMES
            .iter()
            .position(|&candidate| candidate == name)
            .map(|i| Self::ALL[i])
    }

    /// Pitch codes 0..72; [`crate::LAST_NOTE`] maps to `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }
}

impl Display for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Note> for &'static str {
    fn from(value: Note) -> Self {
        value.name()
    }
}

impl TryFrom<String> for Note {
    type Error = BadNoteName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value).ok_or(BadNoteName(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown note name \"{0}\"")]
pub struct BadNoteName(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LAST_NOTE;
    use pretty_assertions::assert_eq;

    fn song_with_sequence(len: usize) -> Song {
        let mut song = Song::default();
        for channel in &mut song.channels {
            channel.resize(len, 0);
        }
        song
    }

    #[test]
    fn note_table_is_consistent() {
        for (i, note) in Note::ALL.iter().enumerate() {
            assert_eq!(*note as usize, i);
            assert_eq!(Note::from_name(note.name()), Some(*note));
        }
        assert_eq!(Note::None as u8, LAST_NOTE);
        assert_eq!(Note::CSharp4.name(), "Cs4");
        assert_eq!(Note::from_code(LAST_NOTE + 1), None);
        assert_eq!(Note::from_name("H_4"), None);
    }

    #[test]
    fn effect_codes() {
        for code in 0..16 {
            assert_eq!(u8::from(EffectId::try_from(code).unwrap()), code);
        }
        assert_eq!(EffectId::try_from(16), Err(BadEffectCode(16)));
        let cell = Cell::new(Note::C_5, 1, EffectId::SetVol, 0x3f);
        assert_eq!(cell.effect_word(), 0xC3F);
    }

    #[test]
    fn flat_instrument_indexing() {
        let mut song = Song::default();
        song.duty_instruments[14].name = "last duty".into();
        song.wave_instruments[0].name = "first wave".into();
        song.noise_instruments[14].name = "last noise".into();

        assert_eq!(song.instrument_count(), 45);
        let duty = song.instrument_at(14).unwrap();
        assert_eq!((duty.kind(), duty.name()), (InstrKind::Duty, "last duty"));
        let wave = song.instrument_at(15).unwrap();
        assert_eq!((wave.kind(), wave.name()), (InstrKind::Wave, "first wave"));
        let noise = song.instrument_at(44).unwrap();
        assert_eq!((noise.kind(), noise.name()), (InstrKind::Noise, "last noise"));
        assert_eq!(song.instrument_at(45), None);
    }

    #[test]
    fn order_matrix_collapses_duplicates() {
        let mut song = Song::default();
        song.channels = [vec![3, 1, 3, 0], vec![5, 5, 5, 5], vec![0, 1, 2, 3], vec![9; 4]];
        let matrix = song.order_matrix();
        assert_eq!(matrix[0].iter().copied().collect::<Vec<_>>(), [0, 1, 3]);
        assert_eq!(matrix[1].iter().copied().collect::<Vec<_>>(), [5]);
        assert_eq!(matrix[2].len(), 4);
        assert_eq!(matrix[3].iter().copied().collect::<Vec<_>>(), [9]);
    }

    #[test]
    fn find_stop_blank_song() {
        assert_eq!(Song::default().find_stop(), SongPosition::default());
        assert_eq!(song_with_sequence(3).find_stop(), SongPosition::default());
    }

    #[test]
    fn find_stop_finds_last_used_row() {
        let mut song = song_with_sequence(3);
        song.channels[2] = vec![0, 1, 0];
        song.orders[2][1][10].note = Note::A_4;
        song.orders[0][0][40].note = Note::C_5;
        // Slot 0 of channel 0 is played at every order, so row 40 of order 2 is the last one.
        assert_eq!(song.find_stop(), SongPosition { order: 2, row: 40 });

        song.orders[0][0][40] = Cell::BLANK;
        assert_eq!(song.find_stop(), SongPosition { order: 1, row: 10 });
    }

    #[test]
    fn compare_ignores_name_on_request() {
        let mut a = song_with_sequence(1);
        a.name = "Song A".into();
        let mut b = a.clone();
        b.name = "Song B".into();

        assert_eq!(a.compare(&b, false), Ordering::Equal);
        assert_eq!(a.compare(&b, true), Ordering::Less);
        assert_eq!(a.content_hash(false), b.content_hash(false));
        assert_ne!(a.content_hash(true), b.content_hash(true));

        b.orders[3][0][0].instrument = 1;
        assert_ne!(a.compare(&b, false), Ordering::Equal);
        assert_ne!(a.content_hash(false), b.content_hash(false));
    }

    #[test]
    fn sequence_length_bounds() {
        assert_eq!(Song::default().validate(), Err(InvalidSong::EmptySequences));
        assert_eq!(song_with_sequence(1).validate(), Ok(()));
        // `order_cnt` is twice the length, and must fit in a byte.
        assert_eq!(song_with_sequence(127).validate(), Ok(()));
        assert_eq!(
            song_with_sequence(128).validate(),
            Err(InvalidSong::SequenceTooLong(128))
        );
    }

    #[test]
    fn validation() {
        let mut song = song_with_sequence(2);
        assert_eq!(song.validate(), Ok(()));

        song.channels[3].push(0);
        assert_eq!(song.validate(), Err(InvalidSong::UnevenSequences([2, 2, 2, 3])));
        song.channels[3].pop();

        song.channels[1][1] = 200;
        assert!(matches!(
            song.validate(),
            Err(InvalidSong::SlotOutOfRange {
                channel: 1,
                position: 1,
                slot: 200
            })
        ));
        song.channels[1][1] = 0;

        song.noise_instruments[3].envelope_step = 8;
        assert!(matches!(
            song.validate(),
            Err(InvalidSong::Instrument {
                kind: InstrKind::Noise,
                index: 3,
                ..
            })
        ));
        song.noise_instruments[3].envelope_step = -7;

        song.waves[15][31] = 16;
        assert!(matches!(song.validate(), Err(InvalidSong::Wave { index: 15, .. })));
    }
}

//! Rebuilding a [`Song`] from C source previously written by [`crate::export`].
//!
//! Only playback-relevant content survives: patterns are placed in fresh slots, in order of first
//! use, and instrument names are lost.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    export::{
        order_array_name, DUTY_TABLE_NAME, NOISE_TABLE_NAME, ORDER_COUNT_NAME, SONG_TYPE_NAME,
        WAVE_INSTR_TABLE_NAME, WAVE_TABLE_NAME,
    },
    matcher::{parse_declarations, Declaration, Shape, SyntaxError, Value},
    registers::{parse_bank, Registers},
    song::{
        DutyInstrument, InstrumentBank, NoiseInstrument, Pattern, Song, Wave, WaveBank,
        WaveInstrument, BLANK_PATTERN,
    },
    INSTRUMENTS_PER_KIND, MAX_SEQUENCE_LEN, NB_CHANNELS, NB_WAVES, PATTERN_LENGTH,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecomposeError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("Line {line}: don't know what to do with `{name}`")]
    Unrecognised { line: usize, name: String },
    #[error("Line {line}: `{name}` is declared more than once")]
    Duplicate { line: usize, name: String },
    #[error("Line {line}: `{name}` must only contain {expected}")]
    BadValue {
        line: usize,
        name: String,
        expected: &'static str,
    },
    #[error("Line {line}: order count is {count}, but must be within 0..={}", MAX_SEQUENCE_LEN * 2)]
    BadOrderCount { line: usize, count: i64 },
    #[error("Line {line}: `{name}` is {len} orders long, but at most {} are supported", MAX_SEQUENCE_LEN)]
    SequenceTooLong {
        line: usize,
        name: String,
        len: usize,
    },
    #[error("Line {line}: pattern `{name}` has {count} rows, but at most {} are supported", PATTERN_LENGTH)]
    TooManyCells {
        line: usize,
        name: String,
        count: usize,
    },
    #[error("Line {line}: `{name}` holds {len} bytes, but {expected} were expected")]
    WrongLength {
        line: usize,
        name: String,
        len: usize,
        expected: usize,
    },
    #[error("Line {line}: `{name}` references unknown pattern `{symbol}`")]
    UnknownSymbol {
        line: usize,
        name: String,
        symbol: String,
    },
    #[error("Order arrays have different lengths ({0:?}); all four must match")]
    UnevenOrders([usize; NB_CHANNELS]),
    #[error("Order arrays are empty; the song must be at least one order long")]
    EmptyOrders,
    #[error("The order count declaration (`{}`) is missing", ORDER_COUNT_NAME)]
    MissingOrderCount,
    #[error("The song descriptor (a `{}` struct) is missing", SONG_TYPE_NAME)]
    MissingDescriptor,
    #[error("Order array `order{0}` is missing")]
    MissingOrder(usize),
    #[error("Table `{0}` is missing")]
    MissingTable(&'static str),
}

pub fn from_c(source: &str) -> Result<Song, RecomposeError> {
    let declarations = parse_declarations(source)?;
    let mut recomposer = Recomposer::default();
    for declaration in &declarations {
        recomposer.take(declaration)?;
    }
    let song = recomposer.finish()?;
    info!(
        "Recomposed \"{}\": {} orders from {} declarations",
        song.name,
        song.channels[0].len(),
        declarations.len(),
    );
    Ok(song)
}

/// Replaces `song` with the song described by `source`; if that fails, `song` is left alone,
/// and `on_error` is called instead.
pub fn recompose_into(
    source: &str,
    song: &mut Song,
    mut on_error: impl FnMut(&RecomposeError),
) -> bool {
    match from_c(source) {
        Ok(recomposed) => {
            *song = recomposed;
            true
        }
        Err(err) => {
            on_error(&err);
            false
        }
    }
}

/// Accumulates declarations until the whole song is known.
#[derive(Debug, Default)]
struct Recomposer<'input> {
    order_count: Option<usize>,
    /// Pattern symbol -> (position among pattern declarations, content).
    patterns: HashMap<&'input str, (usize, Pattern)>,
    /// Line of the declaration, and the symbols it lists.
    orders: [Option<(usize, Vec<&'input str>)>; NB_CHANNELS],
    duty: Option<InstrumentBank<DutyInstrument>>,
    wave: Option<InstrumentBank<WaveInstrument>>,
    noise: Option<InstrumentBank<NoiseInstrument>>,
    waves: Option<WaveBank>,
    /// Display name, and ticks per row.
    descriptor: Option<(String, u8)>,
}

impl<'input> Recomposer<'input> {
    fn take(&mut self, decl: &Declaration<'input>) -> Result<(), RecomposeError> {
        debug!("Line {}: {:?} `{}`", decl.line, decl.shape, decl.name);
        match (decl.shape, decl.name) {
            (Shape::Simple, ORDER_COUNT_NAME) => {
                let count = self.order_count(decl)?;
                set_once(&mut self.order_count, count, decl)
            }
            (Shape::Array, name) if is_pattern_symbol(name) => self.pattern(decl),
            (Shape::Array, name) if order_channel(name).is_some() => self.order(decl),
            (Shape::Array, DUTY_TABLE_NAME) => {
                let bank = bank::<_, INSTRUMENTS_PER_KIND>(decl)?;
                set_once(&mut self.duty, bank, decl)
            }
            (Shape::Array, WAVE_INSTR_TABLE_NAME) => {
                let bank = bank::<_, INSTRUMENTS_PER_KIND>(decl)?;
                set_once(&mut self.wave, bank, decl)
            }
            (Shape::Array, NOISE_TABLE_NAME) => {
                let bank = bank::<_, INSTRUMENTS_PER_KIND>(decl)?;
                set_once(&mut self.noise, bank, decl)
            }
            (Shape::Array, WAVE_TABLE_NAME) => {
                let bank = bank::<Wave, NB_WAVES>(decl)?;
                set_once(&mut self.waves, bank, decl)
            }
            (Shape::Struct, _) if decl.type_name == SONG_TYPE_NAME => {
                let descriptor = descriptor(decl)?;
                set_once(&mut self.descriptor, descriptor, decl)
            }
            _ => Err(RecomposeError::Unrecognised {
                line: decl.line,
                name: decl.name.to_owned(),
            }),
        }
    }

    fn order_count(&self, decl: &Declaration) -> Result<usize, RecomposeError> {
        match decl.values[..] {
            [Value::Int(count)] => usize::try_from(count)
                .ok()
                .filter(|&count| count <= MAX_SEQUENCE_LEN * 2)
                .ok_or(RecomposeError::BadOrderCount {
                    line: decl.line,
                    count,
                }),
            _ => Err(bad_value(decl, "an integer")),
        }
    }

    fn pattern(&mut self, decl: &Declaration<'input>) -> Result<(), RecomposeError> {
        let cells = decl
            .values
            .iter()
            .map(|value| match value {
                Value::Cell(cell) => Ok(*cell),
                _ => Err(bad_value(decl, "CELL(...) literals")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if cells.len() > PATTERN_LENGTH {
            return Err(RecomposeError::TooManyCells {
                line: decl.line,
                name: decl.name.to_owned(),
                count: cells.len(),
            });
        }
        // Shorter patterns are padded with blank rows.
        let mut pattern = BLANK_PATTERN;
        pattern[..cells.len()].copy_from_slice(&cells);

        if self.patterns.contains_key(decl.name) {
            return Err(duplicate(decl));
        }
        let index = self.patterns.len();
        debug!("Pattern `{}` is #{index} in emission order", decl.name);
        self.patterns.insert(decl.name, (index, pattern));
        Ok(())
    }

    fn order(&mut self, decl: &Declaration<'input>) -> Result<(), RecomposeError> {
        let Some(channel) = order_channel(decl.name) else {
            unreachable!("`take` only calls this for order arrays");
        };
        let symbols = decl
            .values
            .iter()
            .map(|value| match value {
                Value::Ident(symbol) => Ok(*symbol),
                _ => Err(bad_value(decl, "pattern names")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if symbols.len() > MAX_SEQUENCE_LEN {
            return Err(RecomposeError::SequenceTooLong {
                line: decl.line,
                name: decl.name.to_owned(),
                len: symbols.len(),
            });
        }
        set_once(&mut self.orders[channel], (decl.line, symbols), decl)
    }

    fn finish(self) -> Result<Song, RecomposeError> {
        let order_count = self.order_count.ok_or(RecomposeError::MissingOrderCount)?;
        let (name, ticks_per_row) = self.descriptor.ok_or(RecomposeError::MissingDescriptor)?;
        let mut song = Song {
            name,
            ticks_per_row,
            duty_instruments: self
                .duty
                .ok_or(RecomposeError::MissingTable(DUTY_TABLE_NAME))?,
            wave_instruments: self
                .wave
                .ok_or(RecomposeError::MissingTable(WAVE_INSTR_TABLE_NAME))?,
            noise_instruments: self
                .noise
                .ok_or(RecomposeError::MissingTable(NOISE_TABLE_NAME))?,
            waves: self
                .waves
                .ok_or(RecomposeError::MissingTable(WAVE_TABLE_NAME))?,
            ..Default::default()
        };

        for (channel, order) in self.orders.into_iter().enumerate() {
            let (line, symbols) = order.ok_or(RecomposeError::MissingOrder(channel + 1))?;
            // Each distinct pattern gets the next free slot in this channel's bank.
            let mut slots: HashMap<&str, u8> = HashMap::new();
            for symbol in symbols {
                let slot = match slots.get(symbol) {
                    Some(&slot) => slot,
                    None => {
                        let (index, pattern) = self.patterns.get(symbol).ok_or_else(|| {
                            RecomposeError::UnknownSymbol {
                                line,
                                name: order_array_name(channel),
                                symbol: symbol.to_owned(),
                            }
                        })?;
                        // There are at most `MAX_SEQUENCE_LEN` symbols, so this fits in the bank.
                        let slot = slots.len() as u8;
                        debug!(
                            "CH{} slot {slot} <- `{symbol}` (pattern #{index} in emission order)",
                            channel + 1,
                        );
                        song.orders[channel][usize::from(slot)] = *pattern;
                        slots.insert(symbol, slot);
                        slot
                    }
                };
                song.channels[channel].push(slot);
            }
        }

        let lens: [usize; NB_CHANNELS] = std::array::from_fn(|ch| song.channels[ch].len());
        if lens.iter().any(|&len| len != lens[0]) {
            return Err(RecomposeError::UnevenOrders(lens));
        }
        if lens[0] == 0 {
            return Err(RecomposeError::EmptyOrders);
        }
        if order_count != lens[0] * 2 {
            warn!(
                "`{ORDER_COUNT_NAME}` is {order_count}, but the order arrays are {} long",
                lens[0]
            );
        }
        Ok(song)
    }
}

fn is_pattern_symbol(name: &str) -> bool {
    name.strip_prefix('P')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|c| c.is_ascii_digit()))
}

/// `order1` through `order4`, as a 0-based channel ID.
fn order_channel(name: &str) -> Option<usize> {
    match name.strip_prefix("order")? {
        "1" => Some(0),
        "2" => Some(1),
        "3" => Some(2),
        "4" => Some(3),
        _ => None,
    }
}

fn bank<T: Registers, const N: usize>(decl: &Declaration) -> Result<[T; N], RecomposeError> {
    let bytes = decl
        .values
        .iter()
        .map(|value| match *value {
            Value::Int(n) => u8::try_from(n).map_err(|_| bad_value(decl, "bytes (0..=255)")),
            _ => Err(bad_value(decl, "bytes (0..=255)")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    parse_bank(&bytes).ok_or_else(|| RecomposeError::WrongLength {
        line: decl.line,
        name: decl.name.to_owned(),
        len: bytes.len(),
        expected: N * T::SIZE,
    })
}

fn descriptor(decl: &Declaration) -> Result<(String, u8), RecomposeError> {
    match decl.values.first() {
        Some(&Value::Int(ticks)) => {
            let ticks = u8::try_from(ticks)
                .map_err(|_| bad_value(decl, "a tick count (0..=255) as its first field"))?;
            Ok((decl.name.replace('_', " "), ticks))
        }
        _ => Err(bad_value(decl, "a tick count (0..=255) as its first field")),
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, decl: &Declaration) -> Result<(), RecomposeError> {
    if slot.is_some() {
        return Err(duplicate(decl));
    }
    *slot = Some(value);
    Ok(())
}

fn duplicate(decl: &Declaration) -> RecomposeError {
    RecomposeError::Duplicate {
        line: decl.line,
        name: decl.name.to_owned(),
    }
}

fn bad_value(decl: &Declaration, expected: &'static str) -> RecomposeError {
    RecomposeError::BadValue {
        line: decl.line,
        name: decl.name.to_owned(),
        expected,
    }
}

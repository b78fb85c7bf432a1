//! Conversion between instruments/waves and the raw bytes the driver writes to the APU registers.
//!
//! Every layout here has exactly as many bits as the hardware, so values that don't fit are
//! rejected instead of being truncated.

use std::num::NonZeroU8;

use thiserror::Error;

use crate::{
    song::{
        DutyInstrument, DutyType, LfsrWidth, NoiseInstrument, Wave, WaveInstrument,
        WaveOutputLevel,
    },
    WAVE_SAMPLES,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} out of range ({value}, expected {min}..={max})")]
pub struct RangeError {
    pub field: &'static str,
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

fn check<T: Into<i32>>(field: &'static str, value: T, min: i32, max: i32) -> Result<(), RangeError> {
    let value = value.into();
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(RangeError {
            field,
            value,
            min,
            max,
        })
    }
}

/// Something with a fixed-size register image.
pub trait Registers: Sized {
    const SIZE: usize;

    fn write_registers(&self, out: &mut Vec<u8>) -> Result<(), RangeError>;

    /// `bytes` must be exactly `SIZE` bytes long.
    fn read_registers(bytes: &[u8]) -> Self;
}

/// Serialises a whole bank; on failure, reports which entry was at fault.
pub fn serialize_bank<T: Registers>(bank: &[T]) -> Result<Vec<u8>, (usize, RangeError)> {
    let mut out = Vec::with_capacity(bank.len() * T::SIZE);
    for (i, entry) in bank.iter().enumerate() {
        entry.write_registers(&mut out).map_err(|err| (i, err))?;
    }
    Ok(out)
}

/// Parses a whole bank, or returns `None` if `bytes` isn't exactly `N` entries long.
pub fn parse_bank<T: Registers, const N: usize>(bytes: &[u8]) -> Option<[T; N]> {
    if bytes.len() != N * T::SIZE {
        return None;
    }
    let mut chunks = bytes.chunks_exact(T::SIZE);
    Some(std::array::from_fn(|_| {
        // The length check above guarantees there are exactly `N` chunks.
        T::read_registers(chunks.next().unwrap_or_default())
    }))
}

// Shared fields.

/// Envelope "step" as stored in the low nibble of NRx2, biased so that 0 means "no envelope".
pub fn encode_envelope(step: i8) -> Result<u8, RangeError> {
    check("Envelope step", step, -7, 7)?;
    Ok(match step {
        0 => 0,
        1.. => 0x8 | (8 - step as u8),
        _ => 8 - step.unsigned_abs(),
    })
}

pub fn decode_envelope(nibble: u8) -> i8 {
    let nibble = nibble & 0x0F;
    if nibble & 0x8 != 0 {
        8 - (nibble & 0x7) as i8
    } else if nibble == 0 {
        0
    } else {
        -(8 - nibble as i8)
    }
}

/// Sign-magnitude: bit 3 is set for negative shifts.
fn encode_sweep_shift(shift: i8) -> Result<u8, RangeError> {
    check("Sweep shift", shift, -7, 7)?;
    Ok(if shift < 0 {
        0x8 | shift.unsigned_abs()
    } else {
        shift as u8
    })
}

fn decode_sweep_shift(nibble: u8) -> i8 {
    let magnitude = (nibble & 0x7) as i8;
    if nibble & 0x8 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// The 6-bit length counter counts up to 64.
fn encode_length(length: Option<NonZeroU8>) -> Result<u8, RangeError> {
    match length {
        Some(len) => {
            check("Length", len.get(), 1, 64)?;
            Ok(64 - len.get())
        }
        None => Ok(0),
    }
}

fn decode_length(enabled: bool, raw: u8) -> Option<NonZeroU8> {
    // This is always within 1..=64.
    enabled.then(|| NonZeroU8::new(64 - (raw & 0x3F))).flatten()
}

/// NRx4: always retrigger, and enable the length counter if asked to.
fn trigger_byte(length_enabled: bool) -> u8 {
    0x80 | u8::from(length_enabled) << 6
}

fn length_enabled(nrx4: u8) -> bool {
    nrx4 & 0x40 != 0
}

fn volume_envelope(initial_volume: u8, envelope_step: i8) -> Result<u8, RangeError> {
    check("Initial volume", initial_volume, 0, 15)?;
    Ok(initial_volume << 4 | encode_envelope(envelope_step)?)
}

// Instruments.

impl DutyInstrument {
    pub fn to_bytes(&self) -> Result<[u8; 4], RangeError> {
        check("Sweep time", self.sweep_time, 0, 7)?;
        Ok([
            self.sweep_time << 4 | encode_sweep_shift(self.sweep_shift)?,
            (self.duty as u8) << 6 | encode_length(self.length)?,
            volume_envelope(self.initial_volume, self.envelope_step)?,
            trigger_byte(self.length.is_some()),
        ])
    }

    pub fn from_bytes([nr10, nr11, nr12, nr14]: [u8; 4]) -> Self {
        Self {
            name: String::new(),
            length: decode_length(length_enabled(nr14), nr11),
            sweep_time: nr10 >> 4 & 0x7,
            sweep_shift: decode_sweep_shift(nr10),
            duty: match nr11 >> 6 {
                0 => DutyType::Percent12_5,
                1 => DutyType::Percent25,
                2 => DutyType::Percent50,
                _ => DutyType::Percent75,
            },
            initial_volume: nr12 >> 4,
            envelope_step: decode_envelope(nr12),
        }
    }
}

impl WaveInstrument {
    pub fn to_bytes(&self) -> Result<[u8; 4], RangeError> {
        check("Wave index", self.wave_index, 0, 15)?;
        Ok([
            self.length.unwrap_or(0),
            (self.output_level as u8) << 5,
            self.wave_index,
            trigger_byte(self.length.is_some()),
        ])
    }

    pub fn from_bytes([nr31, nr32, wave_index, nr34]: [u8; 4]) -> Self {
        Self {
            name: String::new(),
            length: length_enabled(nr34).then_some(nr31),
            output_level: match nr32 >> 5 & 0x3 {
                0 => WaveOutputLevel::Mute,
                1 => WaveOutputLevel::Full,
                2 => WaveOutputLevel::Half,
                _ => WaveOutputLevel::Quarter,
            },
            wave_index: wave_index & 0x0F,
        }
    }
}

impl NoiseInstrument {
    pub fn to_bytes(&self) -> Result<[u8; 8], RangeError> {
        let [m0, m1, m2, m3, m4, m5] = self.modulation.map(|step| step as u8);
        Ok([
            volume_envelope(self.initial_volume, self.envelope_step)?,
            (self.lfsr_width as u8) << 7
                | u8::from(self.length.is_some()) << 6
                | encode_length(self.length)?,
            m0,
            m1,
            m2,
            m3,
            m4,
            m5,
        ])
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let [nr42, flags, modulation @ ..] = bytes;
        Self {
            name: String::new(),
            length: decode_length(length_enabled(flags), flags),
            initial_volume: nr42 >> 4,
            envelope_step: decode_envelope(nr42),
            lfsr_width: if flags & 0x80 != 0 {
                LfsrWidth::Seven
            } else {
                LfsrWidth::Fifteen
            },
            modulation: modulation.map(|step| step as i8),
        }
    }
}

// Waves.

/// Two samples per byte, the earlier one in the high nibble.
pub fn pack_wave(wave: &Wave) -> Result<[u8; WAVE_SAMPLES / 2], RangeError> {
    let mut packed = [0; WAVE_SAMPLES / 2];
    for (byte, pair) in packed.iter_mut().zip(wave.chunks_exact(2)) {
        check("Wave sample", pair[0], 0, 15)?;
        check("Wave sample", pair[1], 0, 15)?;
        *byte = pair[0] << 4 | pair[1];
    }
    Ok(packed)
}

pub fn unpack_wave(packed: &[u8; WAVE_SAMPLES / 2]) -> Wave {
    std::array::from_fn(|i| {
        let byte = packed[i / 2];
        if i % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        }
    })
}

// Bank plumbing.

/// Copies a slice into a fixed-size array; callers have already checked the length.
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

impl Registers for DutyInstrument {
    const SIZE: usize = 4;

    fn write_registers(&self, out: &mut Vec<u8>) -> Result<(), RangeError> {
        out.extend_from_slice(&self.to_bytes()?);
        Ok(())
    }

    fn read_registers(bytes: &[u8]) -> Self {
        Self::from_bytes(fixed(bytes))
    }
}

impl Registers for WaveInstrument {
    const SIZE: usize = 4;

    fn write_registers(&self, out: &mut Vec<u8>) -> Result<(), RangeError> {
        out.extend_from_slice(&self.to_bytes()?);
        Ok(())
    }

    fn read_registers(bytes: &[u8]) -> Self {
        Self::from_bytes(fixed(bytes))
    }
}

impl Registers for NoiseInstrument {
    const SIZE: usize = 8;

    fn write_registers(&self, out: &mut Vec<u8>) -> Result<(), RangeError> {
        out.extend_from_slice(&self.to_bytes()?);
        Ok(())
    }

    fn read_registers(bytes: &[u8]) -> Self {
        Self::from_bytes(fixed(bytes))
    }
}

impl Registers for Wave {
    const SIZE: usize = WAVE_SAMPLES / 2;

    fn write_registers(&self, out: &mut Vec<u8>) -> Result<(), RangeError> {
        out.extend_from_slice(&pack_wave(self)?);
        Ok(())
    }

    fn read_registers(bytes: &[u8]) -> Self {
        unpack_wave(&fixed(bytes))
    }
}

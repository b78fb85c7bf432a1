//! Songs going through both text formats and coming back.

use std::{cmp::Ordering, collections::HashSet, num::NonZeroU8};

use baritone::{
    from_c, from_json, recompose_into,
    song::{DutyInstrument, DutyType, LfsrWidth, NoiseInstrument, WaveInstrument, WaveOutputLevel},
    to_c, to_json, Cell, EffectId, InvalidSong, Note, Song, NB_CHANNELS, PATTERN_LENGTH,
};
use pretty_assertions::assert_eq;

fn row(note: Note, instrument: u8, effect: EffectId, param: u8) -> Cell {
    Cell::new(note, instrument, effect, param)
}

/// Slots are numbered in order of first use, so the C round trip preserves them.
fn forest_theme() -> Song {
    let mut song = Song::default();
    song.name = "Forest theme".into();
    song.artist = "Nobody in particular".into();
    song.comment = "Test fixture".into();
    song.ticks_per_row = 6;

    let mut lead = [Cell::BLANK; PATTERN_LENGTH];
    for (i, cell) in lead.iter_mut().enumerate().step_by(4) {
        *cell = row(Note::from_code(24 + (i / 4) as u8).unwrap(), 1, EffectId::SetVol, 0x0C);
    }
    let mut bridge = lead;
    bridge[63] = row(Note::None, 0, EffectId::PatternBreak, 0);
    let mut bass = [Cell::BLANK; PATTERN_LENGTH];
    bass[0] = row(Note::C_3, 2, EffectId::Vibrato, 0x32);
    bass[32] = row(Note::G_3, 2, EffectId::PortaDown, 0x04);
    let mut drums = [Cell::BLANK; PATTERN_LENGTH];
    for cell in drums.iter_mut().step_by(8) {
        *cell = row(Note::C_6, 1, EffectId::NoteCut, 2);
    }

    song.orders[0][0] = lead;
    song.orders[0][1] = bridge;
    // Same content as channel 1's lead, in another channel.
    song.orders[1][0] = lead;
    song.orders[2][0] = bass;
    song.orders[3][0] = drums;
    song.channels = [
        vec![0, 0, 1],
        vec![0, 1, 1],
        vec![0, 0, 0],
        vec![0, 0, 0],
    ];

    song.duty_instruments[0] = DutyInstrument {
        name: String::new(),
        length: NonZeroU8::new(16),
        sweep_time: 3,
        sweep_shift: -5,
        duty: DutyType::Percent25,
        initial_volume: 15,
        envelope_step: -2,
    };
    song.duty_instruments[14].duty = DutyType::Percent75;
    song.duty_instruments[14].envelope_step = 7;
    song.wave_instruments[1] = WaveInstrument {
        name: String::new(),
        length: Some(200),
        output_level: WaveOutputLevel::Half,
        wave_index: 3,
    };
    song.noise_instruments[0] = NoiseInstrument {
        name: String::new(),
        length: NonZeroU8::new(64),
        initial_volume: 9,
        envelope_step: -7,
        lfsr_width: LfsrWidth::Seven,
        modulation: [1, -1, 2, -2, 0, 127],
    };
    song.waves[3] = std::array::from_fn(|i| if i < 16 { 15 } else { 0 });
    song.waves[15] = std::array::from_fn(|i| (i / 2) as u8);
    song
}

#[test]
fn json_is_lossless() {
    let mut song = forest_theme();
    song.duty_instruments[0].name = "Pluck".into();
    // Neither referenced nor blank.
    song.orders[2][99][5] = row(Note::B_8, 15, EffectId::SetTempo, 0xFF);

    let text = to_json(&song).unwrap();
    assert_eq!(from_json(&text).unwrap(), song);
}

#[test]
fn c_keeps_what_plays() {
    let song = forest_theme();
    let recomposed = from_c(&to_c(&song).unwrap()).unwrap();

    for channel in 0..NB_CHANNELS {
        assert_eq!(recomposed.channels[channel].len(), song.channels[channel].len());
        for order in 0..song.channels[channel].len() {
            assert_eq!(
                recomposed.pattern_at(channel, order),
                song.pattern_at(channel, order),
                "Channel {} order {order}",
                channel + 1,
            );
        }
    }
    assert_eq!(recomposed.duty_instruments, song.duty_instruments);
    assert_eq!(recomposed.wave_instruments, song.wave_instruments);
    assert_eq!(recomposed.noise_instruments, song.noise_instruments);
    assert_eq!(recomposed.waves, song.waves);
    assert_eq!(recomposed.ticks_per_row, song.ticks_per_row);
    // The display name only survives as an identifier.
    assert_eq!(recomposed.name, "Forest theme");
}

#[test]
fn c_round_trip_is_equivalent_besides_metadata() {
    let mut song = forest_theme();
    song.artist.clear();
    song.comment.clear();
    let recomposed = from_c(&to_c(&song).unwrap()).unwrap();

    assert_eq!(recomposed.compare(&song, false), Ordering::Equal);
    assert_eq!(recomposed.content_hash(false), song.content_hash(false));
    assert_eq!(to_c(&recomposed).unwrap(), to_c(&song).unwrap());
}

#[test]
fn identical_patterns_are_emitted_once() {
    let song = forest_theme();
    let text = to_c(&song).unwrap();

    let orders = &song.orders;
    let distinct: HashSet<_> = song
        .order_matrix()
        .iter()
        .enumerate()
        .flat_map(|(channel, slots)| {
            slots
                .iter()
                .map(move |&slot| orders[channel][usize::from(slot)])
        })
        .collect();
    // Lead, bridge, bass, drums, and the blank one channel 2 ends on.
    assert_eq!(distinct.len(), 5);
    let declared = text
        .lines()
        .filter(|line| line.starts_with("static const unsigned char P"))
        .count();
    assert_eq!(declared, distinct.len());
}

#[test]
fn comments_do_not_matter() {
    let text = to_c(&forest_theme()).unwrap();
    let headered = format!(
        "// Generated from forest.json\n/* Some\n   notes */\n{}",
        text.replace("order_cnt = 6;", "order_cnt = 6; // three orders")
    );
    assert_eq!(from_c(&headered).unwrap(), from_c(&text).unwrap());
}

#[test]
fn failed_recomposition_leaves_song_alone() {
    let text = to_c(&forest_theme()).unwrap().replace("order3", "order7");
    let mut song = forest_theme();
    let mut errors = 0;
    assert!(!recompose_into(&text, &mut song, |_| errors += 1));
    assert_eq!(errors, 1);
    assert_eq!(song, forest_theme());
}

#[test]
fn out_of_range_fields_are_not_exported() {
    let mut song = forest_theme();
    song.duty_instruments[4].initial_volume = 16;
    assert!(matches!(
        to_c(&song),
        Err(InvalidSong::Instrument { index: 4, .. })
    ));

    let mut song = forest_theme();
    song.waves[2][0] = 16;
    assert!(matches!(to_c(&song), Err(InvalidSong::Wave { index: 2, .. })));

    let mut song = forest_theme();
    song.channels[3].push(0);
    assert!(matches!(to_c(&song), Err(InvalidSong::UnevenSequences(_))));
}

#[test]
fn hand_edited_order_count_needs_no_type() {
    let text = to_c(&forest_theme()).unwrap();
    let edited = text.replace("static const unsigned char order_cnt = 6;", "order_cnt = 0;");
    assert_ne!(edited, text);
    // The count is informational; the order arrays still decide the length.
    assert_eq!(from_c(&edited).unwrap(), from_c(&text).unwrap());
}

#[test]
fn longest_song_fits_the_order_count() {
    let mut song = forest_theme();
    for sequence in &mut song.channels {
        sequence.resize(128, 0);
    }
    assert!(matches!(to_c(&song), Err(InvalidSong::SequenceTooLong(128))));

    for sequence in &mut song.channels {
        sequence.pop();
    }
    let text = to_c(&song).unwrap();
    assert!(text.contains("order_cnt = 254;"));
    assert_eq!(from_c(&text).unwrap().channels[0].len(), 127);
}

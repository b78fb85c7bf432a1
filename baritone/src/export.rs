use std::fmt::{self, Write};

use tracing::info;

use crate::{
    dedup::{deduplicate, Deduplicated, PatternCatalog},
    registers::{serialize_bank, Registers},
    song::{InvalidSong, Pattern, Song},
    NB_CHANNELS,
};

pub const ORDER_COUNT_NAME: &str = "order_cnt";
pub const DUTY_TABLE_NAME: &str = "duty_instruments";
pub const WAVE_INSTR_TABLE_NAME: &str = "wave_instruments";
pub const NOISE_TABLE_NAME: &str = "noise_instruments";
pub const WAVE_TABLE_NAME: &str = "waves";
pub const SONG_TYPE_NAME: &str = "hUGESong_t";

/// The result of exporting a song: the text, plus how patterns were mapped to symbols.
#[derive(Debug, Clone)]
pub struct Emission {
    pub text: String,
    pub catalog: PatternCatalog,
    /// Each channel's sequence, as indices into `catalog`.
    pub orders: [Vec<usize>; NB_CHANNELS],
    pub order_count: usize,
}

pub fn to_c(song: &Song) -> Result<String, InvalidSong> {
    emit(song).map(|emission| emission.text)
}

pub fn emit(song: &Song) -> Result<Emission, InvalidSong> {
    song.validate()?;

    let Deduplicated { catalog, orders } = deduplicate(song);
    let order_count = song.channels[0].len() * 2;

    let mut text = String::new();
    write_song(&mut text, song, &catalog, &orders, order_count)
        .expect("Formatting into a `String` cannot fail");

    info!(
        "Exported \"{}\": {} orders, {} unique patterns",
        song.name,
        song.channels[0].len(),
        catalog.len(),
    );
    Ok(Emission {
        text,
        catalog,
        orders,
        order_count,
    })
}

pub fn symbol_name(symbol: usize) -> String {
    format!("P{symbol}")
}

pub fn order_array_name(channel: usize) -> String {
    format!("order{}", channel + 1)
}

/// The song's display name, turned into a C identifier.
pub fn song_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.is_empty() {
        ident.push_str("song");
    } else if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

fn write_song(
    output: &mut String,
    song: &Song,
    catalog: &PatternCatalog,
    orders: &[Vec<usize>; NB_CHANNELS],
    order_count: usize,
) -> fmt::Result {
    writeln!(output, "#include \"hUGEDriver.h\"")?;
    writeln!(output, "#include <stddef.h>")?;
    writeln!(output)?;
    writeln!(output, "static const unsigned char {ORDER_COUNT_NAME} = {order_count};")?;
    writeln!(output)?;

    for (symbol, pattern) in catalog.patterns().iter().enumerate() {
        write_pattern(output, &symbol_name(symbol), pattern)?;
        writeln!(output)?;
    }

    for (channel, symbols) in orders.iter().enumerate() {
        write!(
            output,
            "static const unsigned char* const {}[] = {{",
            order_array_name(channel)
        )?;
        for (i, &symbol) in symbols.iter().enumerate() {
            if i != 0 {
                output.push(',');
            }
            output.push_str(&symbol_name(symbol));
        }
        writeln!(output, "}};")?;
    }
    writeln!(output)?;

    write_table(output, DUTY_TABLE_NAME, &song.duty_instruments)?;
    write_table(output, WAVE_INSTR_TABLE_NAME, &song.wave_instruments)?;
    write_table(output, NOISE_TABLE_NAME, &song.noise_instruments)?;
    writeln!(output)?;
    write_table(output, WAVE_TABLE_NAME, &song.waves)?;
    writeln!(output)?;

    writeln!(
        output,
        "const {SONG_TYPE_NAME} {} = {{{}, &{ORDER_COUNT_NAME}, order1, order2, order3, order4, \
         {DUTY_TABLE_NAME}, {WAVE_INSTR_TABLE_NAME}, {NOISE_TABLE_NAME}, NULL, {WAVE_TABLE_NAME}}};",
        song_identifier(&song.name),
        song.ticks_per_row,
    )
}

fn write_pattern(output: &mut String, name: &str, pattern: &Pattern) -> fmt::Result {
    writeln!(output, "static const unsigned char {name}[] = {{")?;
    for cell in pattern {
        writeln!(
            output,
            "    CELL({},{},0x{:03X}),",
            cell.note,
            cell.instrument,
            cell.effect_word(),
        )?;
    }
    writeln!(output, "}};")
}

/// One line per entry, so that the tables stay readable.
fn write_table<T: Registers>(output: &mut String, name: &str, entries: &[T]) -> fmt::Result {
    writeln!(output, "static const unsigned char {name}[] = {{")?;
    for entry in entries {
        // The song has been validated, so this can't fail.
        let bytes = serialize_bank(std::slice::from_ref(entry)).unwrap_or_default();
        for byte in bytes {
            write!(output, "{byte},")?;
        }
        writeln!(output)?;
    }
    writeln!(output, "}};")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{Cell, EffectId, Note};
    use pretty_assertions::assert_eq;

    fn two_order_song() -> Song {
        let mut song = Song::default();
        song.name = "Forest theme".into();
        song.ticks_per_row = 6;
        song.channels = [vec![0, 1], vec![5, 5], vec![0, 0], vec![0, 0]];
        song.orders[0][0][0] = Cell::new(Note::C_5, 1, EffectId::SetVol, 0x0F);
        song.orders[0][1][63] = Cell::new(Note::B_8, 15, EffectId::PatternBreak, 0);
        song.orders[1][5] = song.orders[0][0];
        song
    }

    #[test]
    fn identifiers() {
        assert_eq!(song_identifier("Forest theme"), "Forest_theme");
        assert_eq!(song_identifier(""), "song");
        assert_eq!(song_identifier("8-bit love"), "_8_bit_love");
        assert_eq!(symbol_name(12), "P12");
        assert_eq!(order_array_name(3), "order4");
    }

    #[test]
    fn shared_pattern_is_emitted_once() {
        let emission = emit(&two_order_song()).unwrap();
        // Ch1's two slots, plus the blank pattern used by ch3 and ch4.
        assert_eq!(emission.catalog.len(), 3);
        assert_eq!(emission.order_count, 4);
        assert_eq!(emission.text.matches("static const unsigned char P0[]").count(), 1);
        assert!(!emission.text.contains("P3[]"));
        assert!(emission
            .text
            .contains("static const unsigned char* const order1[] = {P0,P1};\n"));
        assert!(emission
            .text
            .contains("static const unsigned char* const order2[] = {P0,P0};\n"));
        assert!(emission
            .text
            .contains("static const unsigned char* const order4[] = {P2,P2};\n"));
    }

    #[test]
    fn text_layout() {
        let text = to_c(&two_order_song()).unwrap();
        assert!(text.starts_with(
            "#include \"hUGEDriver.h\"\n#include <stddef.h>\n\nstatic const unsigned char order_cnt = 4;\n\n\
             static const unsigned char P0[] = {\n    CELL(C_5,1,0xC0F),\n    CELL(___,0,0x000),\n"
        ));
        assert!(text.contains("    CELL(B_8,15,0xD00),\n};\n"));
        assert!(text.contains("static const unsigned char duty_instruments[] = {\n0,128,0,128,\n"));
        assert!(text.contains("static const unsigned char noise_instruments[] = {\n0,0,0,0,0,0,0,0,\n"));
        assert!(text.ends_with(
            "const hUGESong_t Forest_theme = {6, &order_cnt, order1, order2, order3, order4, \
             duty_instruments, wave_instruments, noise_instruments, NULL, waves};\n"
        ));
        assert_eq!(text.matches("CELL(").count(), 3 * 64);
    }

    #[test]
    fn invalid_songs_are_rejected() {
        let mut song = two_order_song();
        song.channels[2].pop();
        assert!(matches!(emit(&song), Err(InvalidSong::UnevenSequences(_))));
    }

    #[test]
    fn sequence_length_limits() {
        assert_eq!(to_c(&Song::default()), Err(InvalidSong::EmptySequences));

        let mut song = Song::default();
        for sequence in &mut song.channels {
            sequence.resize(128, 0);
        }
        assert_eq!(to_c(&song), Err(InvalidSong::SequenceTooLong(128)));

        for sequence in &mut song.channels {
            sequence.pop();
        }
        let text = to_c(&song).unwrap();
        assert!(text.contains("static const unsigned char order_cnt = 254;\n"));
    }
}

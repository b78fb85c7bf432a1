use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap},
    hash::BuildHasherDefault,
};

use tracing::debug;

use crate::{
    song::{Pattern, Song},
    NB_CHANNELS,
};

/// Convenience shortcut; a fixed hasher keeps the whole export deterministic.
pub type SymbolMap = HashMap<Pattern, usize, BuildHasherDefault<DefaultHasher>>;

/// Every distinct pattern content seen so far, each with the symbol it's emitted under.
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    patterns: Vec<Pattern>,
    symbols: SymbolMap,
}

impl PatternCatalog {
    /// Returns the pattern's symbol, allocating the next one if the content is new.
    /// The boolean is `true` in the latter case.
    pub fn intern(&mut self, pattern: &Pattern) -> (usize, bool) {
        if let Some(&symbol) = self.symbols.get(pattern) {
            return (symbol, false);
        }
        let symbol = self.patterns.len();
        self.patterns.push(*pattern);
        self.symbols.insert(*pattern, symbol);
        (symbol, true)
    }

    pub fn symbol_of(&self, pattern: &Pattern) -> Option<usize> {
        self.symbols.get(pattern).copied()
    }

    pub fn get(&self, symbol: usize) -> Option<&Pattern> {
        self.patterns.get(symbol)
    }

    /// Patterns in symbol order.
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Deduplicated {
    pub catalog: PatternCatalog,
    /// Each channel's sequence, expressed as symbols instead of slots.
    pub orders: [Vec<usize>; NB_CHANNELS],
}

/// Assigns one symbol per distinct pattern content, across all channels.
///
/// The song must have passed [`Song::validate`], otherwise out-of-range slots will panic.
pub fn deduplicate(song: &Song) -> Deduplicated {
    let mut catalog = PatternCatalog::default();
    let mut slot_symbols: [BTreeMap<u8, usize>; NB_CHANNELS] = Default::default();

    for (channel, slots) in song.order_matrix().iter().enumerate() {
        for &slot in slots {
            let (symbol, fresh) = catalog.intern(&song.orders[channel][usize::from(slot)]);
            if fresh {
                debug!("CH{} slot {slot} -> new pattern P{symbol}", channel + 1);
            } else {
                debug!("CH{} slot {slot} -> reusing P{symbol}", channel + 1);
            }
            slot_symbols[channel].insert(slot, symbol);
        }
    }

    let orders = std::array::from_fn(|channel| {
        song.channels[channel]
            .iter()
            .map(|slot| slot_symbols[channel][slot])
            .collect()
    });
    Deduplicated { catalog, orders }
}

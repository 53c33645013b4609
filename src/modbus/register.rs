// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Conversion between 16-bit register words and counter values

use crate::config::WordOrder;

/// Combine register words into a counter value.
///
/// With [`WordOrder::LowFirst`] the value is `words[0] + words[1] * 65536 + ...`,
/// which is the ADAM-6051 layout. At most four words are used.
pub fn decode_counter(words: &[u16], order: WordOrder) -> u64 {
    let words = &words[..words.len().min(4)];
    let combine = |acc: u64, word: &u16| (acc << 16) | u64::from(*word);
    match order {
        WordOrder::LowFirst => words.iter().rev().fold(0, combine),
        WordOrder::HighFirst => words.iter().fold(0, combine),
    }
}

/// Split a counter value into `count` register words.
pub fn encode_counter(value: u64, count: usize, order: WordOrder) -> Vec<u16> {
    let count = count.min(4);
    let mut words: Vec<u16> = (0..count)
        .map(|i| ((value >> (16 * i)) & 0xFFFF) as u16)
        .collect();
    if order == WordOrder::HighFirst {
        words.reverse();
    }
    words
}

//! Command encoding for the page transfer link and the packing of cache
//! words into 32-bit link words.

use std::collections::VecDeque;
use std::fmt;

use crate::common::{PageTag, Word};

pub mod marker {
    pub const FETCH: u32 = 0x6E70_6E70;
    pub const WRITEBACK: u32 = 0x61B0_61B0;
    pub const FLUSH_REQUEST: u32 = 0x000F_1005;
    pub const FLUSH_DONE: u32 = 0xD1DF_1005;
    pub const INVALIDATE_ALL: u32 = 0x000C_105E;
}

/// Link words in an encoded command: marker, tag low, tag high, reserved.
pub const COMMAND_WORDS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Fetch { tag: PageTag },
    Writeback { tag: PageTag },
    FlushRequest,
    FlushDone,
    InvalidateAll,
}

impl Command {
    pub fn marker(&self) -> u32 {
        match self {
            Command::Fetch { .. } => marker::FETCH,
            Command::Writeback { .. } => marker::WRITEBACK,
            Command::FlushRequest => marker::FLUSH_REQUEST,
            Command::FlushDone => marker::FLUSH_DONE,
            Command::InvalidateAll => marker::INVALIDATE_ALL,
        }
    }

    pub fn encode(&self) -> Vec<u32> {
        let tag = match self {
            Command::Fetch { tag } | Command::Writeback { tag } => *tag,
            _ => 0,
        };
        let mut words = vec![0; COMMAND_WORDS];
        words[0] = self.marker();
        words[1] = tag as u32;
        words[2] = (tag >> 32) as u32;
        words
    }

    /// Decode a received command. Tag words missing from a short message
    /// read as zero; an unknown marker yields `None`.
    pub fn decode(words: &[u32]) -> Option<Command> {
        let m = *words.first()?;
        let lo = words.get(1).copied().unwrap_or(0) as u64;
        let hi = words.get(2).copied().unwrap_or(0) as u64;
        let tag = lo | (hi << 32);
        match m {
            marker::FETCH => Some(Command::Fetch { tag }),
            marker::WRITEBACK => Some(Command::Writeback { tag }),
            marker::FLUSH_REQUEST => Some(Command::FlushRequest),
            marker::FLUSH_DONE => Some(Command::FlushDone),
            marker::INVALIDATE_ALL => Some(Command::InvalidateAll),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Fetch { tag } => write!(f, "Fetch({tag:#x})"),
            Command::Writeback { tag } => write!(f, "Writeback({tag:#x})"),
            Command::FlushRequest => write!(f, "FlushRequest"),
            Command::FlushDone => write!(f, "FlushDone"),
            Command::InvalidateAll => write!(f, "InvalidateAll"),
        }
    }
}

/// Serialize cache words little-endian into link words.
pub fn pack_page(words: &[Word], word_bytes: usize) -> Vec<u32> {
    let mut bytes = Vec::with_capacity(words.len() * word_bytes);
    for w in words {
        bytes.extend_from_slice(&w.to_le_bytes()[..word_bytes]);
    }
    bytes
        .chunks(4)
        .map(|c| {
            let mut b = [0u8; 4];
            b[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(b)
        })
        .collect()
}

/// Inverse of `pack_page`, fed one link word at a time.
#[derive(Clone, Debug)]
pub struct PageUnpacker {
    word_bytes: usize,
    bytes: VecDeque<u8>,
}

impl PageUnpacker {
    pub fn new(word_bytes: usize) -> Self {
        PageUnpacker { word_bytes, bytes: VecDeque::new() }
    }

    pub fn push(&mut self, link_word: u32) {
        self.bytes.extend(link_word.to_le_bytes());
    }

    /// Next complete cache word, if enough bytes have arrived.
    pub fn pop(&mut self) -> Option<Word> {
        if self.bytes.len() < self.word_bytes {
            return None;
        }
        let mut w: Word = 0;
        for (i, b) in self.bytes.drain(..self.word_bytes).enumerate() {
            w |= (b as Word) << (8 * i);
        }
        Some(w)
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Collect every cache word out of a complete run of link words.
pub fn unpack_page(link_words: &[u32], word_bytes: usize) -> Vec<Word> {
    let mut unpacker = PageUnpacker::new(word_bytes);
    let mut words = Vec::new();
    for &lw in link_words {
        unpacker.push(lw);
        while let Some(w) = unpacker.pop() {
            words.push(w);
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_layout() {
        let c = Command::Fetch { tag: 0x12_3456_789a };
        assert_eq!(c.encode(), vec![marker::FETCH, 0x3456_789a, 0x12, 0]);
        assert_eq!(Command::decode(&c.encode()), Some(c));
        assert_eq!(Command::FlushDone.encode(), vec![0xD1DF_1005, 0, 0, 0]);
        assert_eq!(Command::InvalidateAll.encode().len(), COMMAND_WORDS);
    }

    #[test]
    fn one_word_flush_request() {
        // a host may send the bare marker
        assert_eq!(Command::decode(&[0xF1005]), Some(Command::FlushRequest));
        assert_eq!(Command::decode(&[0xC105E]), Some(Command::InvalidateAll));
    }

    #[test]
    fn unknown_marker() {
        assert_eq!(Command::decode(&[0xdead_beef, 1, 2, 3]), None);
        assert_eq!(Command::decode(&[]), None);
    }

    #[test]
    fn pack_narrow_words() {
        let linked = pack_page(&[0x11, 0x22, 0x33, 0x44, 0x55], 1);
        assert_eq!(linked, vec![0x4433_2211, 0x55]);
    }

    #[test]
    fn pack_wide_words() {
        let linked = pack_page(&[0x0102_0304_0506_0708], 8);
        assert_eq!(linked, vec![0x0506_0708, 0x0102_0304]);
        assert_eq!(unpack_page(&linked, 8), vec![0x0102_0304_0506_0708]);
    }

    #[test]
    fn unpacker_waits_for_full_word() {
        let mut u = PageUnpacker::new(8);
        u.push(0xaaaa_aaaa);
        assert_eq!(u.pop(), None);
        u.push(0x1);
        assert_eq!(u.pop(), Some(0x1_aaaa_aaaa));
        assert_eq!(u.pop(), None);
    }

    #[test]
    fn unpack_16_bit_words() {
        assert_eq!(unpack_page(&[0xbbbb_aaaa, 0xdddd_cccc], 2), vec![0xaaaa, 0xbbbb, 0xcccc, 0xdddd]);
    }
}

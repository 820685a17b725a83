use std::fmt;

use crate::error::ConfigError;

/// A cache word. Only the low `word_width` bits are significant.
pub type Word = u64;
/// Index of one associative way of the page cache.
pub type SlotId = usize;
/// High-order address bits identifying a page.
pub type PageTag = u64;

/// Bytes moved per link word; transfer lengths are counted in these units.
pub const LINK_WORD_BYTES: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemSpec {         // unit         reasonable defaults
    pub addr_width: u32,        // bits         64
    pub word_width: u32,        // bits         32
    pub page_size: u32,         // bytes        4096
    pub link_width: u32,        // bits         128
    pub num_slots: u32,         // pages        4
    pub link_depth: u32,        // link words   16
    pub mem_lat: u32,           // cycles       0
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            addr_width: 64,
            word_width: 32,
            page_size: 4096,
            link_width: 128,
            num_slots: 4,
            link_depth: 16,
            mem_lat: 0,
        }
    }
}

fn log2(n: u32) -> u32 {
    n.trailing_zeros()
}

impl SystemSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pow2 = [
            ("addr_width", self.addr_width),
            ("word_width", self.word_width),
            ("page_size", self.page_size),
            ("link_width", self.link_width),
            ("num_slots", self.num_slots),
        ];
        for (field, value) in pow2 {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { field, value });
            }
        }
        let ranges = [
            ("addr_width", self.addr_width, 8, 64),
            ("word_width", self.word_width, 8, 64),
            ("link_width", self.link_width, 32, 1024),
            ("link_depth", self.link_depth, 1, u32::MAX),
        ];
        for (field, value, min, max) in ranges {
            if value < min || value > max {
                return Err(ConfigError::OutOfRange { field, value, min, max });
            }
        }
        if (self.page_size as u64) * 8 <= self.line_width() as u64 {
            return Err(ConfigError::PageNotLargerThanLine {
                page_size: self.page_size,
                line_width: self.line_width(),
            });
        }
        if self.addr_width <= self.page_bits() {
            return Err(ConfigError::NoTagBits {
                addr_width: self.addr_width,
                page_bits: self.page_bits(),
            });
        }
        Ok(())
    }

    // geometry

    pub fn word_bytes(&self) -> u32 {
        self.word_width / 8
    }
    /// Width of one cache memory line, the wider of link and word.
    pub fn line_width(&self) -> u32 {
        self.link_width.max(self.word_width)
    }
    pub fn line_bytes(&self) -> u32 {
        self.line_width() / 8
    }
    pub fn words_per_line(&self) -> usize {
        (self.line_width() / self.word_width) as usize
    }
    pub fn lines_per_page(&self) -> usize {
        (self.page_size / self.line_bytes()) as usize
    }
    pub fn words_per_page(&self) -> usize {
        (self.page_size / self.word_bytes()) as usize
    }
    /// Length of a page transfer in link words.
    pub fn link_words_per_page(&self) -> u32 {
        self.page_size / LINK_WORD_BYTES
    }
    /// Link words moved per cycle.
    pub fn beat(&self) -> usize {
        (self.link_width / (LINK_WORD_BYTES * 8)) as usize
    }
    pub fn page_bits(&self) -> u32 {
        log2(self.page_size)
    }
    pub fn tag_width(&self) -> u32 {
        self.addr_width - self.page_bits()
    }
    pub fn word_mask(&self) -> Word {
        if self.word_width >= 64 { Word::MAX } else { (1 << self.word_width) - 1 }
    }
    pub fn addr_mask(&self) -> u64 {
        if self.addr_width >= 64 { u64::MAX } else { (1 << self.addr_width) - 1 }
    }
}

// addresses

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u64);

/// A virtual address split into its cache coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodedAddr {
    pub page_tag: PageTag,
    pub line_index: usize,
    pub word_index: usize,
    pub byte_offset: u32,
}

impl VirtAddr {
    /// get page tag, line, word and byte offset of this address under given system specs
    pub fn decode(&self, spec: &SystemSpec) -> DecodedAddr {
        let a = self.0 & spec.addr_mask();
        let word_bytes = spec.word_bytes() as u64;
        DecodedAddr {
            page_tag: a >> spec.page_bits(),
            line_index: ((a / spec.line_bytes() as u64) % spec.lines_per_page() as u64) as usize,
            word_index: ((a / word_bytes) % spec.words_per_line() as u64) as usize,
            byte_offset: (a % word_bytes) as u32,
        }
    }
    pub fn page_tag(&self, spec: &SystemSpec) -> PageTag {
        (self.0 & spec.addr_mask()) >> spec.page_bits()
    }
    /// Address of the following word, wrapping at the top of the address space.
    pub fn next_word(&self, spec: &SystemSpec) -> VirtAddr {
        VirtAddr(self.0.wrapping_add(spec.word_bytes() as u64) & spec.addr_mask())
    }
    pub fn offset_words(&self, words: u64, spec: &SystemSpec) -> VirtAddr {
        VirtAddr(self.0.wrapping_add(words * spec.word_bytes() as u64) & spec.addr_mask())
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// MESSAGE TYPES

/// One client access as presented on the register interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Request {
    pub addr: VirtAddr,
    pub num_words: u32,
    pub write_enable: bool,
    pub write_data: Word,
}

impl Request {
    pub fn read(addr: VirtAddr, num_words: u32) -> Self {
        Request { addr, num_words, write_enable: false, write_data: 0 }
    }
    pub fn write(addr: VirtAddr, num_words: u32, write_data: Word) -> Self {
        Request { addr, num_words, write_enable: true, write_data }
    }
}

/// Client-driven signal levels for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientInputs {
    pub request: Option<Request>,
    pub flush_all: bool,
}

/// Controller-driven signal levels for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientOutputs {
    pub data_read: Word,
    pub done: bool,
    pub write_ack: bool,
}

// programs

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Read { addr: VirtAddr, words: u32 },
    Write { addr: VirtAddr, data: Vec<Word> },
    Flush,
}

pub type Insts = Vec<Instr>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_geometry() {
        let spec = SystemSpec::default();
        assert!(spec.validate().is_ok());
        assert_eq!(spec.line_width(), 128);
        assert_eq!(spec.words_per_line(), 4);
        assert_eq!(spec.lines_per_page(), 256);
        assert_eq!(spec.words_per_page(), 1024);
        assert_eq!(spec.link_words_per_page(), 1024);
        assert_eq!(spec.beat(), 4);
        assert_eq!(spec.page_bits(), 12);
        assert_eq!(spec.tag_width(), 52);
    }

    #[test]
    fn decode_splits_address() {
        let spec = SystemSpec::default();
        let d = VirtAddr(0x0abc_d123_4568).decode(&spec);
        assert_eq!(d.page_tag, 0x0abc_d123_4);
        // 0x568 = line 0x56, word 2 of the 16-byte line
        assert_eq!(d.line_index, 0x56);
        assert_eq!(d.word_index, 2);
        assert_eq!(d.byte_offset, 0);
    }

    #[test]
    fn decode_reports_unaligned_offset() {
        let spec = SystemSpec::default();
        let d = VirtAddr(0x1003).decode(&spec);
        assert_eq!(d.page_tag, 1);
        assert_eq!(d.word_index, 0);
        assert_eq!(d.byte_offset, 3);
    }

    #[test]
    fn decode_with_wide_words() {
        let spec = SystemSpec { word_width: 64, link_width: 32, ..Default::default() };
        assert!(spec.validate().is_ok());
        // lines are one 64-bit word wide
        assert_eq!(spec.words_per_line(), 1);
        let d = VirtAddr(0x2018).decode(&spec);
        assert_eq!(d.page_tag, 2);
        assert_eq!(d.line_index, 3);
        assert_eq!(d.word_index, 0);
    }

    #[test]
    fn narrow_address_space_masks_high_bits() {
        let spec = SystemSpec { addr_width: 32, ..Default::default() };
        assert_eq!(VirtAddr(0xffff_ffff_0000_1000).page_tag(&spec), 1);
        assert_eq!(VirtAddr(0xffff_fffc).next_word(&spec), VirtAddr(0));
    }

    #[test]
    fn validate_rejects_bad_specs() {
        let bad = SystemSpec { page_size: 3000, ..Default::default() };
        assert_eq!(
            bad.validate(),
            Err(ConfigError::NotPowerOfTwo { field: "page_size", value: 3000 })
        );
        let bad = SystemSpec { page_size: 16, ..Default::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::PageNotLargerThanLine { .. })));
        let bad = SystemSpec { word_width: 128, ..Default::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::OutOfRange { field: "word_width", .. })));
        let bad = SystemSpec { link_depth: 0, ..Default::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::OutOfRange { field: "link_depth", .. })));
        let bad = SystemSpec { addr_width: 8, page_size: 256, link_width: 32, ..Default::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::NoTagBits { .. })));
    }
}

use crate::common::{SlotId, SystemSpec, Word};

/// Storage for `num_slots` pages, addressed by (slot, line, word).
#[derive(Clone, Debug)]
pub struct CacheMemory {
    lines_per_page: usize,
    words_per_line: usize,
    word_bytes: usize,
    word_mask: Word,
    cells: Vec<Word>,
}

impl CacheMemory {
    pub fn new(spec: &SystemSpec) -> Self {
        let words = spec.num_slots as usize * spec.words_per_page();
        CacheMemory {
            lines_per_page: spec.lines_per_page(),
            words_per_line: spec.words_per_line(),
            word_bytes: spec.word_bytes() as usize,
            word_mask: spec.word_mask(),
            cells: vec![0; words],
        }
    }

    fn index(&self, slot: SlotId, line: usize, word: usize) -> usize {
        debug_assert!(line < self.lines_per_page && word < self.words_per_line);
        (slot * self.lines_per_page + line) * self.words_per_line + word
    }

    pub fn read_word(&self, slot: SlotId, line: usize, word: usize) -> Word {
        self.cells[self.index(slot, line, word)]
    }

    pub fn read_line(&self, slot: SlotId, line: usize) -> &[Word] {
        let start = self.index(slot, line, 0);
        &self.cells[start..start + self.words_per_line]
    }

    pub fn write_word(&mut self, slot: SlotId, line: usize, word: usize, data: Word) {
        let i = self.index(slot, line, word);
        self.cells[i] = data & self.word_mask;
    }

    /// Byte-enabled write: bit `b` of `byte_enable` selects byte `b` of the word.
    pub fn write_masked(&mut self, slot: SlotId, line: usize, word: usize, data: Word, byte_enable: u8) {
        let mut mask: Word = 0;
        for b in 0..self.word_bytes {
            if byte_enable & (1 << b) != 0 {
                mask |= 0xff << (8 * b);
            }
        }
        let i = self.index(slot, line, word);
        self.cells[i] = (self.cells[i] & !mask) | (data & mask & self.word_mask);
    }

    /// Write the `n`th word of a page in transfer order.
    pub fn write_page_word(&mut self, slot: SlotId, n: usize, data: Word) {
        self.write_word(slot, n / self.words_per_line, n % self.words_per_line, data);
    }

    /// Every word of a page, line-major.
    pub fn page(&self, slot: SlotId) -> &[Word] {
        let start = self.index(slot, 0, 0);
        &self.cells[start..start + self.lines_per_page * self.words_per_line]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_spec() -> SystemSpec {
        SystemSpec { page_size: 64, link_width: 64, num_slots: 2, ..Default::default() }
    }

    #[test]
    fn words_are_independent_per_slot() {
        let spec = small_spec();
        let mut mem = CacheMemory::new(&spec);
        mem.write_word(0, 3, 1, 0xaaaa);
        mem.write_word(1, 3, 1, 0xbbbb);
        assert_eq!(mem.read_word(0, 3, 1), 0xaaaa);
        assert_eq!(mem.read_word(1, 3, 1), 0xbbbb);
        assert_eq!(mem.read_line(0, 3), &[0, 0xaaaa]);
    }

    #[test]
    fn writes_are_truncated_to_word_width() {
        let spec = small_spec();
        let mut mem = CacheMemory::new(&spec);
        mem.write_word(0, 0, 0, 0x1_2345_6789);
        assert_eq!(mem.read_word(0, 0, 0), 0x2345_6789);
    }

    #[test]
    fn byte_enables() {
        let spec = small_spec();
        let mut mem = CacheMemory::new(&spec);
        mem.write_word(1, 0, 0, 0x1122_3344);
        mem.write_masked(1, 0, 0, 0xaabb_ccdd, 0b0101);
        assert_eq!(mem.read_word(1, 0, 0), 0x11bb_33dd);
    }

    #[test]
    fn page_words_in_transfer_order() {
        let spec = small_spec();
        let mut mem = CacheMemory::new(&spec);
        for n in 0..spec.words_per_page() {
            mem.write_page_word(1, n, n as Word);
        }
        assert_eq!(mem.read_word(1, 2, 1), 5);
        let page: Vec<Word> = mem.page(1).to_vec();
        assert_eq!(page, (0..16).collect::<Vec<Word>>());
        assert!(mem.page(0).iter().all(|&w| w == 0));
    }
}

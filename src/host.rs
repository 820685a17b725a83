use std::collections::{HashMap, VecDeque};

use log::{debug, info, warn};

use crate::common::{PageTag, SystemSpec, VirtAddr, Word};
use crate::link::{Channel, LinkPort, LinkSignal};
use crate::protocol::Command;

/// Protocol events observed by the host, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Fetch { tag: PageTag },
    /// recorded once the page data has been fully received
    Writeback { tag: PageTag, words: Vec<u32> },
    FlushDone,
    Unknown { words: Vec<u32> },
}

/// Initial contents of untouched memory, as one 32-bit value per aligned
/// 32-bit address.
pub type Pattern = fn(u64) -> u32;

/// Every 32-bit word holds its own index within a 16 KiB window.
pub fn count_pattern(addr: u64) -> u32 {
    ((addr & 0x3FFF) >> 2) as u32
}

pub fn zero_pattern(_: u64) -> u32 {
    0
}

/// Backing store on the far side of the link. Serves Fetch requests,
/// absorbs Writebacks and can issue remote commands of its own.
pub struct HostMemory {
    spec: SystemSpec,
    port: LinkPort,
    pages: HashMap<PageTag, Vec<u8>>,
    pattern: Pattern,
    transcript: Vec<LinkEvent>,
    cycle: u64,
    cmd_words: Vec<u32>,
    pending_writebacks: VecDeque<PageTag>,
    wb_words: Vec<u32>,
    fetch_queue: VecDeque<(PageTag, u64)>,
    remote_queue: VecDeque<Vec<u32>>,
    flush_acknowledged: bool,
    truncate_fetch: Option<u32>,
}

impl HostMemory {
    pub fn new(spec: SystemSpec) -> Self {
        Self::with_pattern(spec, count_pattern)
    }

    pub fn with_pattern(spec: SystemSpec, pattern: Pattern) -> Self {
        HostMemory {
            spec,
            port: LinkPort::new(&spec),
            pages: HashMap::new(),
            pattern,
            transcript: Vec::new(),
            cycle: 0,
            cmd_words: Vec::new(),
            pending_writebacks: VecDeque::new(),
            wb_words: Vec::new(),
            fetch_queue: VecDeque::new(),
            remote_queue: VecDeque::new(),
            flush_acknowledged: false,
            truncate_fetch: None,
        }
    }

    /// Answer every Fetch with only the first `words` link words, while
    /// still announcing a full page.
    pub fn truncate_fetches(&mut self, words: Option<u32>) {
        self.truncate_fetch = words;
    }

    pub fn transcript(&self) -> &[LinkEvent] {
        &self.transcript
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    pub fn flush_acknowledged(&self) -> bool {
        self.flush_acknowledged
    }

    pub fn send_remote(&mut self, cmd: Command) {
        info!("host: queueing {cmd}");
        self.remote_queue.push_back(cmd.encode());
    }

    /// Queue an arbitrary command message, well-formed or not.
    pub fn send_raw(&mut self, words: Vec<u32>) {
        self.remote_queue.push_back(words);
    }

    /// No transfer in flight and nothing queued.
    pub fn is_quiet(&self) -> bool {
        self.port.is_quiet()
            && self.fetch_queue.is_empty()
            && self.remote_queue.is_empty()
            && self.pending_writebacks.is_empty()
    }

    pub fn deliver(&mut self, sig: LinkSignal) {
        self.port.deliver(sig);
    }

    pub fn take_link_signals(&mut self) -> Vec<LinkSignal> {
        self.port.take_signals()
    }

    // backing store

    fn page_mut(&mut self, tag: PageTag) -> &mut Vec<u8> {
        let page_size = self.spec.page_size as u64;
        let pattern = self.pattern;
        self.pages.entry(tag).or_insert_with(|| {
            let base = tag * page_size;
            (0..page_size)
                .step_by(4)
                .flat_map(|off| pattern(base + off).to_le_bytes())
                .collect()
        })
    }

    fn page_link_words(&mut self, tag: PageTag) -> Vec<u32> {
        self.page_mut(tag)
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn store_page(&mut self, tag: PageTag, words: &[u32]) {
        let page = self.page_mut(tag);
        for (i, w) in words.iter().enumerate() {
            let off = i * 4;
            if off + 4 > page.len() {
                break;
            }
            page[off..off + 4].copy_from_slice(&w.to_le_bytes());
        }
    }

    /// Read the cache word at `addr` straight from the backing store.
    pub fn read_word(&mut self, addr: VirtAddr) -> Word {
        let spec = self.spec;
        let d = addr.decode(&spec);
        let off = ((addr.0 & spec.addr_mask()) % spec.page_size as u64) as usize - d.byte_offset as usize;
        let page = self.page_mut(d.page_tag);
        let mut w: Word = 0;
        for (i, b) in page[off..off + spec.word_bytes() as usize].iter().enumerate() {
            w |= (*b as Word) << (8 * i);
        }
        w
    }

    pub fn write_word(&mut self, addr: VirtAddr, data: Word) {
        let spec = self.spec;
        let d = addr.decode(&spec);
        let off = ((addr.0 & spec.addr_mask()) % spec.page_size as u64) as usize - d.byte_offset as usize;
        let bytes = data.to_le_bytes();
        let page = self.page_mut(d.page_tag);
        page[off..off + spec.word_bytes() as usize].copy_from_slice(&bytes[..spec.word_bytes() as usize]);
    }

    // link handling

    /// Advance one cycle.
    pub fn step(&mut self) {
        self.cycle += 1;
        self.receive_commands();
        self.receive_writeback();
        self.answer_fetch();
        if self.port.tx_idle(Channel::Command) {
            if let Some(words) = self.remote_queue.pop_front() {
                self.port.begin(Channel::Command, words);
            }
        }
        self.port.poll();
    }

    fn receive_commands(&mut self) {
        if !self.port.is_receiving(Channel::Command) && self.port.accept(Channel::Command).is_some() {
            self.cmd_words.clear();
        }
        for _ in 0..self.spec.beat() {
            let Some(w) = self.port.pop(Channel::Command) else { break };
            self.cmd_words.push(w.data);
            if w.end {
                self.on_command();
                break;
            }
        }
    }

    fn on_command(&mut self) {
        match Command::decode(&self.cmd_words) {
            Some(Command::Fetch { tag }) => {
                debug!("host: fetch {tag:#x}");
                self.transcript.push(LinkEvent::Fetch { tag });
                self.fetch_queue.push_back((tag, self.cycle + self.spec.mem_lat as u64));
            }
            Some(Command::Writeback { tag }) => {
                debug!("host: writeback {tag:#x}");
                self.pending_writebacks.push_back(tag);
            }
            Some(Command::FlushDone) => {
                info!("host: flush done");
                self.transcript.push(LinkEvent::FlushDone);
                self.flush_acknowledged = true;
            }
            _ => {
                warn!("host: unexpected command {:x?}", self.cmd_words);
                self.transcript.push(LinkEvent::Unknown { words: self.cmd_words.clone() });
            }
        }
    }

    fn receive_writeback(&mut self) {
        if !self.port.is_receiving(Channel::Data) {
            if self.pending_writebacks.is_empty() || self.port.offered(Channel::Data).is_none() {
                return;
            }
            self.port.accept(Channel::Data);
            self.wb_words.clear();
        }
        for _ in 0..self.spec.beat() {
            let Some(w) = self.port.pop(Channel::Data) else { break };
            self.wb_words.push(w.data);
            if w.end {
                let Some(tag) = self.pending_writebacks.pop_front() else { break };
                let words = std::mem::take(&mut self.wb_words);
                if words.len() as u32 != self.spec.link_words_per_page() {
                    warn!("host: writeback of {tag:#x} carried {} words", words.len());
                }
                self.store_page(tag, &words);
                self.transcript.push(LinkEvent::Writeback { tag, words });
                break;
            }
        }
    }

    fn answer_fetch(&mut self) {
        if !self.port.tx_idle(Channel::Data) {
            return;
        }
        match self.fetch_queue.front() {
            Some(&(_, ready)) if ready <= self.cycle => {}
            _ => return,
        }
        let Some((tag, _)) = self.fetch_queue.pop_front() else { return };
        let mut words = self.page_link_words(tag);
        let len = words.len() as u32;
        if let Some(n) = self.truncate_fetch {
            words.truncate(n as usize);
        }
        self.port.begin_with_len(Channel::Data, words, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SystemSpec {
        SystemSpec { page_size: 64, link_width: 64, ..Default::default() }
    }

    #[test]
    fn untouched_memory_follows_pattern() {
        let mut host = HostMemory::new(SystemSpec::default());
        assert_eq!(host.read_word(VirtAddr(0)), 0);
        assert_eq!(host.read_word(VirtAddr(0x10)), 4);
        assert_eq!(host.read_word(VirtAddr(0x4008)), 2);
    }

    #[test]
    fn word_access_with_narrow_words() {
        let spec = SystemSpec { word_width: 16, ..spec() };
        let mut host = HostMemory::with_pattern(spec, zero_pattern);
        host.write_word(VirtAddr(0x42), 0xbeef);
        assert_eq!(host.read_word(VirtAddr(0x42)), 0xbeef);
        assert_eq!(host.read_word(VirtAddr(0x40)), 0);
        assert_eq!(host.page_link_words(1)[0], 0xbeef_0000);
    }

    #[test]
    fn fetch_is_answered_with_page() {
        let spec = spec();
        let mut host = HostMemory::new(spec);
        let mut peer = LinkPort::new(&spec);
        peer.begin(Channel::Command, Command::Fetch { tag: 3 }.encode());

        let mut page = Vec::new();
        for _ in 0..50 {
            peer.poll();
            for s in peer.take_signals() {
                host.deliver(s);
            }
            host.step();
            for s in host.take_link_signals() {
                peer.deliver(s);
            }
            if peer.offered(Channel::Data).is_some() {
                assert_eq!(peer.accept(Channel::Data), Some(16));
            }
            while let Some(w) = peer.pop(Channel::Data) {
                page.push(w.data);
            }
        }
        assert_eq!(host.transcript(), &[LinkEvent::Fetch { tag: 3 }]);
        let expected: Vec<u32> = (0..16).map(|i| count_pattern(3 * 64 + i * 4)).collect();
        assert_eq!(page, expected);
    }
}

use std::fmt;

use log::{debug, info, trace, warn};

use crate::common::{ClientInputs, ClientOutputs, Request, SlotId, SystemSpec, VirtAddr, Word};
use crate::error::ConfigError;
use crate::link::{Channel, LinkPort, LinkSignal};
use crate::lru::ReplacementEngine;
use crate::memory::CacheMemory;
use crate::protocol::{pack_page, Command, PageUnpacker};
use crate::tags::TagStore;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub writebacks: u64,
    pub flushes: u64,
    pub invalidations: u64,
    pub remote_commands: u64,
    pub discarded_commands: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "hits:               {}", self.hits)?;
        writeln!(f, "misses:             {}", self.misses)?;
        writeln!(f, "fetches:            {}", self.fetches)?;
        writeln!(f, "writebacks:         {}", self.writebacks)?;
        writeln!(f, "flushes:            {}", self.flushes)?;
        writeln!(f, "invalidations:      {}", self.invalidations)?;
        writeln!(f, "remote commands:    {}", self.remote_commands)?;
        write!(f, "discarded commands: {}", self.discarded_commands)
    }
}

/// The part of a client request still to be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Burst {
    pub addr: VirtAddr,
    pub remaining: u32,
    pub write: bool,
    /// write data as first latched, used if the client drops its request early
    pub data: Word,
}

impl Burst {
    fn from_request(req: &Request) -> Self {
        Burst {
            addr: req.addr,
            remaining: req.num_words.max(1),
            write: req.write_enable,
            data: req.write_data,
        }
    }

    fn advance(self, spec: &SystemSpec) -> Option<Burst> {
        if self.remaining <= 1 {
            return None;
        }
        Some(Burst { addr: self.addr.next_word(spec), remaining: self.remaining - 1, ..self })
    }
}

/// Progress of a page writeback: command first, then the page contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Command,
    Data,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOrigin {
    Client,
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sweep {
    Scan,
    Writeback { slot: SlotId, phase: Phase },
    Announce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    ResolveHit(Burst),
    ServeRead { burst: Burst, slot: SlotId },
    ServeWrite { burst: Burst, slot: SlotId },
    EvictWriteback { burst: Burst, slot: SlotId, phase: Phase },
    /// `Command` while the Fetch drains, `Data` while the page streams in.
    PageFetch { burst: Burst, slot: SlotId, phase: Phase },
    FlushSweep { origin: FlushOrigin, sweep: Sweep },
    RemoteCommand,
    Done(Option<(Burst, SlotId)>),
    InvalidateAll,
}

/// Demand-paging cache controller. Owns all cache state and one end of the
/// page transfer link; advanced one cycle at a time by `step`.
pub struct CacheController {
    spec: SystemSpec,
    state: State,
    latched: ClientInputs,
    tags: TagStore,
    lru: ReplacementEngine,
    mem: CacheMemory,
    port: LinkPort,
    stats: CacheStats,
    // page fill
    fill: PageUnpacker,
    filled: usize,
    overflow: usize,
    remote_words: Vec<u32>,
}

impl CacheController {
    pub fn new(spec: SystemSpec) -> Result<Self, ConfigError> {
        spec.validate()?;
        let slots = spec.num_slots as usize;
        Ok(CacheController {
            spec,
            state: State::Idle,
            latched: ClientInputs::default(),
            tags: TagStore::new(slots),
            lru: ReplacementEngine::new(slots),
            mem: CacheMemory::new(&spec),
            port: LinkPort::new(&spec),
            stats: CacheStats::default(),
            fill: PageUnpacker::new(spec.word_bytes() as usize),
            filled: 0,
            overflow: 0,
            remote_words: Vec::new(),
        })
    }

    pub fn spec(&self) -> &SystemSpec {
        &self.spec
    }
    pub fn state(&self) -> State {
        self.state
    }
    pub fn tags(&self) -> &TagStore {
        &self.tags
    }
    pub fn lru(&self) -> &ReplacementEngine {
        &self.lru
    }
    pub fn memory(&self) -> &CacheMemory {
        &self.mem
    }
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Idle with nothing left to send.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle && self.port.tx_idle(Channel::Command) && self.port.tx_idle(Channel::Data)
    }

    pub fn deliver(&mut self, sig: LinkSignal) {
        self.port.deliver(sig);
    }

    pub fn take_link_signals(&mut self) -> Vec<LinkSignal> {
        self.port.take_signals()
    }

    /// Advance one cycle. `inputs` are registered at the end of the cycle and
    /// only acted upon by the next call.
    pub fn step(&mut self, inputs: &ClientInputs) -> ClientOutputs {
        let mut out = ClientOutputs::default();
        let next = match self.state {
            State::Idle => self.idle(),
            State::ResolveHit(burst) => self.resolve(burst),
            State::ServeRead { burst, slot } => self.serve_read(burst, slot, &mut out),
            State::ServeWrite { burst, slot } => self.serve_write(burst, slot, &mut out),
            State::EvictWriteback { burst, slot, phase } => self.evict_writeback(burst, slot, phase),
            State::PageFetch { burst, slot, phase } => self.page_fetch(burst, slot, phase),
            State::FlushSweep { origin, sweep } => self.flush_sweep(origin, sweep, &mut out),
            State::RemoteCommand => self.remote_command(),
            State::Done(cont) => self.done(cont),
            State::InvalidateAll => self.invalidate_all(),
        };
        if next != self.state {
            trace!("{:?} -> {:?}", self.state, next);
        }
        self.state = next;
        self.port.poll();
        self.latched = *inputs;
        out
    }

    fn idle(&mut self) -> State {
        if let Some(req) = self.latched.request {
            debug!("request {req:?}");
            return self.resolve(Burst::from_request(&req));
        }
        if self.latched.flush_all {
            info!("client flush");
            return State::FlushSweep { origin: FlushOrigin::Client, sweep: Sweep::Scan };
        }
        if self.port.offered(Channel::Command).is_some() {
            return State::RemoteCommand;
        }
        State::Idle
    }

    fn serve(burst: Burst, slot: SlotId) -> State {
        if burst.write {
            State::ServeWrite { burst, slot }
        } else {
            State::ServeRead { burst, slot }
        }
    }

    fn resolve(&mut self, burst: Burst) -> State {
        let d = burst.addr.decode(&self.spec);
        if d.byte_offset != 0 {
            warn!("unaligned address {}, accessing the containing word", burst.addr);
        }
        if let Some(slot) = self.tags.lookup(d.page_tag) {
            self.stats.hits += 1;
            return Self::serve(burst, slot);
        }
        self.stats.misses += 1;
        let victim = self.lru.victim();
        debug!("miss on page {:#x}, victim slot {victim}", d.page_tag);
        if self.tags.slot(victim).dirty {
            self.begin_writeback(victim);
            State::EvictWriteback { burst, slot: victim, phase: Phase::Command }
        } else {
            self.begin_fetch(burst, victim)
        }
    }

    fn serve_read(&mut self, burst: Burst, slot: SlotId, out: &mut ClientOutputs) -> State {
        let d = burst.addr.decode(&self.spec);
        out.data_read = self.mem.read_word(slot, d.line_index, d.word_index);
        out.done = true;
        self.lru.record_hit(slot);
        trace!("read {} = {:#x}", burst.addr, out.data_read);
        State::Done(burst.advance(&self.spec).map(|b| (b, slot)))
    }

    fn serve_write(&mut self, burst: Burst, slot: SlotId, out: &mut ClientOutputs) -> State {
        let d = burst.addr.decode(&self.spec);
        let data = self.latched.request.map_or(burst.data, |r| r.write_data);
        self.mem.write_word(slot, d.line_index, d.word_index, data);
        self.tags.mark_dirty(slot);
        self.lru.record_hit(slot);
        out.write_ack = true;
        trace!("write {} = {:#x}", burst.addr, data);
        State::Done(burst.advance(&self.spec).map(|b| (b, slot)))
    }

    fn done(&mut self, cont: Option<(Burst, SlotId)>) -> State {
        let Some((burst, slot)) = cont else { return State::Idle };
        let s = self.tags.slot(slot);
        if s.valid && s.tag == burst.addr.page_tag(&self.spec) {
            Self::serve(burst, slot)
        } else {
            State::ResolveHit(burst)
        }
    }

    // page transfers

    fn send_command(&mut self, cmd: Command) {
        if !self.port.begin(Channel::Command, cmd.encode()) {
            warn!("command channel busy, {cmd} dropped");
        }
    }

    fn begin_writeback(&mut self, slot: SlotId) {
        let tag = self.tags.slot(slot).tag;
        info!("writeback page {tag:#x} from slot {slot}");
        self.stats.writebacks += 1;
        self.send_command(Command::Writeback { tag });
    }

    /// Advance a writeback. `None` once the page is fully drained and the
    /// slot is clean.
    fn writeback_step(&mut self, slot: SlotId, phase: Phase) -> Option<Phase> {
        match phase {
            Phase::Command => {
                if !self.port.tx_idle(Channel::Command) {
                    return Some(Phase::Command);
                }
                let words = pack_page(self.mem.page(slot), self.spec.word_bytes() as usize);
                if !self.port.begin(Channel::Data, words) {
                    warn!("data channel busy, writeback of slot {slot} dropped");
                }
                Some(Phase::Data)
            }
            Phase::Data => {
                if !self.port.tx_idle(Channel::Data) {
                    return Some(Phase::Data);
                }
                self.tags.clear_dirty(slot);
                debug!("slot {slot} clean");
                None
            }
        }
    }

    fn evict_writeback(&mut self, burst: Burst, slot: SlotId, phase: Phase) -> State {
        match self.writeback_step(slot, phase) {
            Some(phase) => State::EvictWriteback { burst, slot, phase },
            None => self.begin_fetch(burst, slot),
        }
    }

    fn begin_fetch(&mut self, burst: Burst, slot: SlotId) -> State {
        let tag = burst.addr.page_tag(&self.spec);
        self.tags.evict(slot);
        self.fill.clear();
        self.filled = 0;
        self.overflow = 0;
        self.stats.fetches += 1;
        info!("fetch page {tag:#x} into slot {slot}");
        self.send_command(Command::Fetch { tag });
        State::PageFetch { burst, slot, phase: Phase::Command }
    }

    fn page_fetch(&mut self, burst: Burst, slot: SlotId, phase: Phase) -> State {
        if phase == Phase::Command && !self.port.tx_idle(Channel::Command) {
            return State::PageFetch { burst, slot, phase };
        }
        // the host may already be answering once the Fetch has drained
        let waiting = State::PageFetch { burst, slot, phase: Phase::Data };

        let mut finished = false;
        if !self.port.is_receiving(Channel::Data) {
            match self.port.accept(Channel::Data) {
                Some(len) => {
                    if len != self.spec.link_words_per_page() {
                        warn!("page transfer of {len} words, expected {}", self.spec.link_words_per_page());
                    }
                    finished = len == 0;
                }
                None => return waiting,
            }
        }
        let words_per_page = self.spec.words_per_page();
        for _ in 0..self.spec.beat() {
            if finished {
                break;
            }
            let Some(w) = self.port.pop(Channel::Data) else { break };
            self.fill.push(w.data);
            while let Some(word) = self.fill.pop() {
                if self.filled < words_per_page {
                    self.mem.write_page_word(slot, self.filled, word);
                    self.filled += 1;
                } else {
                    self.overflow += 1;
                }
            }
            finished = w.end;
        }
        if !finished {
            return waiting;
        }

        let tag = burst.addr.page_tag(&self.spec);
        if self.filled < words_per_page {
            warn!("page {tag:#x} truncated after {} of {words_per_page} words", self.filled);
        }
        if self.overflow > 0 {
            warn!("page {tag:#x}: {} surplus words discarded", self.overflow);
        }
        self.tags.install(slot, tag);
        debug!("page {tag:#x} resident in slot {slot}");
        Self::serve(burst, slot)
    }

    // flush and remote control

    fn flush_sweep(&mut self, origin: FlushOrigin, sweep: Sweep, out: &mut ClientOutputs) -> State {
        match sweep {
            Sweep::Scan => match self.tags.first_dirty() {
                Some(slot) => {
                    self.begin_writeback(slot);
                    State::FlushSweep { origin, sweep: Sweep::Writeback { slot, phase: Phase::Command } }
                }
                None => {
                    self.stats.flushes += 1;
                    match origin {
                        FlushOrigin::Client => {
                            info!("flush complete");
                            out.done = true;
                            State::Done(None)
                        }
                        FlushOrigin::Remote => {
                            info!("flush complete, notifying host");
                            self.send_command(Command::FlushDone);
                            State::FlushSweep { origin, sweep: Sweep::Announce }
                        }
                    }
                }
            },
            Sweep::Writeback { slot, phase } => match self.writeback_step(slot, phase) {
                Some(phase) => State::FlushSweep { origin, sweep: Sweep::Writeback { slot, phase } },
                None => State::FlushSweep { origin, sweep: Sweep::Scan },
            },
            Sweep::Announce => {
                if self.port.tx_idle(Channel::Command) {
                    State::Idle
                } else {
                    State::FlushSweep { origin, sweep }
                }
            }
        }
    }

    fn remote_command(&mut self) -> State {
        if !self.port.is_receiving(Channel::Command) {
            match self.port.accept(Channel::Command) {
                Some(0) => {
                    self.remote_words.clear();
                    return self.dispatch_remote();
                }
                Some(_) => self.remote_words.clear(),
                None => return State::Idle,
            }
        }
        for _ in 0..self.spec.beat() {
            let Some(w) = self.port.pop(Channel::Command) else { break };
            self.remote_words.push(w.data);
            if w.end {
                return self.dispatch_remote();
            }
        }
        State::RemoteCommand
    }

    fn dispatch_remote(&mut self) -> State {
        self.stats.remote_commands += 1;
        match Command::decode(&self.remote_words) {
            Some(Command::FlushRequest) => {
                info!("remote flush request");
                State::FlushSweep { origin: FlushOrigin::Remote, sweep: Sweep::Scan }
            }
            Some(Command::InvalidateAll) => State::InvalidateAll,
            other => {
                self.stats.discarded_commands += 1;
                debug!("ignoring remote command {other:?} ({:x?})", self.remote_words);
                State::Idle
            }
        }
    }

    fn invalidate_all(&mut self) -> State {
        info!("invalidating all pages");
        self.tags.invalidate_all();
        self.stats.invalidations += 1;
        State::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SignalKind;

    fn spec() -> SystemSpec {
        SystemSpec { page_size: 64, link_width: 64, ..Default::default() }
    }

    #[test]
    fn rejects_invalid_spec() {
        let bad = SystemSpec { num_slots: 3, ..spec() };
        assert!(CacheController::new(bad).is_err());
    }

    #[test]
    fn idle_without_inputs() {
        let mut c = CacheController::new(spec()).unwrap();
        for _ in 0..3 {
            let out = c.step(&ClientInputs::default());
            assert_eq!(out, ClientOutputs::default());
        }
        assert!(c.is_idle());
        assert!(c.take_link_signals().is_empty());
    }

    #[test]
    fn miss_sends_fetch_after_latch() {
        let mut c = CacheController::new(spec()).unwrap();
        let req = ClientInputs { request: Some(Request::read(VirtAddr(0x1040), 1)), flush_all: false };
        // first step only registers the request
        c.step(&req);
        assert_eq!(c.state(), State::Idle);
        c.step(&req);
        assert!(matches!(c.state(), State::PageFetch { slot: 0, phase: Phase::Command, .. }));
        assert_eq!(c.stats().misses, 1);
        let sigs = c.take_link_signals();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].channel, Channel::Command);
        assert_eq!(sigs[0].kind, SignalKind::Start { len: 4 });
    }

    #[test]
    fn busy_command_channel_drops_command() {
        let mut c = CacheController::new(spec()).unwrap();
        c.send_command(Command::Fetch { tag: 1 });
        c.send_command(Command::FlushDone);
        let starts = c
            .take_link_signals()
            .iter()
            .filter(|s| matches!(s.kind, SignalKind::Start { .. }))
            .count();
        assert_eq!(starts, 1);
        assert!(!c.port.tx_idle(Channel::Command));
    }

    #[test]
    fn fetch_data_accepted_as_command_drains() {
        // one beat carries the whole Fetch
        let spec = SystemSpec { link_width: 128, ..spec() };
        let mut c = CacheController::new(spec).unwrap();
        let mut host = LinkPort::new(&spec);
        let req = ClientInputs { request: Some(Request::read(VirtAddr(0), 1)), flush_all: false };
        c.step(&req);
        c.step(&req);
        // host acks the Fetch, then takes all of it and answers at once
        for s in c.take_link_signals() {
            host.deliver(s);
        }
        assert_eq!(host.accept(Channel::Command), Some(4));
        for s in host.take_signals() {
            c.deliver(s);
        }
        c.step(&req);
        for s in c.take_link_signals() {
            host.deliver(s);
        }
        while host.pop(Channel::Command).is_some() {}
        host.begin(Channel::Data, vec![0; spec.link_words_per_page() as usize]);
        for s in host.take_signals() {
            c.deliver(s);
        }
        c.step(&req);
        assert!(matches!(c.state(), State::PageFetch { phase: Phase::Data, .. }));
        assert!(c.port.is_receiving(Channel::Data));
    }

    #[test]
    fn burst_advance() {
        let spec = spec();
        let b = Burst { addr: VirtAddr(0x3c), remaining: 2, write: false, data: 0 };
        let next = b.advance(&spec).unwrap();
        assert_eq!(next.addr, VirtAddr(0x40));
        assert_eq!(next.remaining, 1);
        assert!(next.advance(&spec).is_none());
        // a zero-word request is served as a single word
        let req = Request::read(VirtAddr(0), 0);
        assert_eq!(Burst::from_request(&req).remaining, 1);
    }
}

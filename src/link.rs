//! Credit-flow-controlled streaming link between the controller and the
//! host. Each side owns a `LinkPort` with a command and a data channel in
//! both directions. A transfer is offered with `Start`, granted with `Ack`
//! carrying the receiver's buffer depth in credits, then streamed one
//! 32-bit word per credit. Popped words hand their credit back.

use std::collections::VecDeque;

use log::{trace, warn};

use crate::common::SystemSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Command,
    Data,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Start { len: u32 },
    Ack { credits: u32 },
    Credit(u32),
    Word { data: u32, last: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSignal {
    pub channel: Channel,
    pub kind: SignalKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxState {
    Idle,
    Offering,
    Streaming,
}

/// Sending half of one channel.
#[derive(Clone, Debug)]
pub struct TxStream {
    channel: Channel,
    beat: usize,
    state: TxState,
    pending: VecDeque<u32>,
    window: u32,
    credits: u32,
}

impl TxStream {
    pub fn new(channel: Channel, beat: usize) -> Self {
        TxStream {
            channel,
            beat,
            state: TxState::Idle,
            pending: VecDeque::new(),
            window: 0,
            credits: 0,
        }
    }

    /// True once the last transfer was fully sent and every credit came back.
    pub fn is_idle(&self) -> bool {
        self.state == TxState::Idle
    }

    /// Offer `words`, announcing `len` as the transfer length. Fails if a
    /// transfer is still in progress.
    pub fn begin_with_len(&mut self, words: Vec<u32>, len: u32, out: &mut VecDeque<LinkSignal>) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.pending = words.into();
        self.state = TxState::Offering;
        out.push_back(LinkSignal { channel: self.channel, kind: SignalKind::Start { len } });
        true
    }

    pub fn begin(&mut self, words: Vec<u32>, out: &mut VecDeque<LinkSignal>) -> bool {
        let len = words.len() as u32;
        self.begin_with_len(words, len, out)
    }

    fn on_ack(&mut self, credits: u32) {
        if self.state != TxState::Offering {
            warn!("{:?} tx: unexpected ack", self.channel);
            return;
        }
        self.window = credits;
        self.credits = credits;
        self.state = TxState::Streaming;
        self.settle();
    }

    fn on_credit(&mut self, n: u32) {
        if self.state != TxState::Streaming {
            warn!("{:?} tx: credit outside a transfer", self.channel);
            return;
        }
        self.credits += n;
        self.settle();
    }

    /// Send up to one beat of words, as far as credits allow.
    pub fn poll(&mut self, out: &mut VecDeque<LinkSignal>) {
        if self.state != TxState::Streaming {
            return;
        }
        for _ in 0..self.beat {
            if self.credits == 0 {
                break;
            }
            let Some(data) = self.pending.pop_front() else { break };
            self.credits -= 1;
            let last = self.pending.is_empty();
            out.push_back(LinkSignal { channel: self.channel, kind: SignalKind::Word { data, last } });
        }
        self.settle();
    }

    fn settle(&mut self) {
        if self.state == TxState::Streaming && self.pending.is_empty() && self.credits >= self.window {
            trace!("{:?} tx: transfer complete", self.channel);
            self.state = TxState::Idle;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RxState {
    Idle,
    Offered { len: u32 },
    Receiving { len: u32, popped: u32 },
}

/// One received link word. `end` marks the final word of its transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxWord {
    pub data: u32,
    pub end: bool,
}

/// Receiving half of one channel.
#[derive(Clone, Debug)]
pub struct RxStream {
    channel: Channel,
    depth: u32,
    state: RxState,
    buffer: VecDeque<u32>,
    last_seen: bool,
}

impl RxStream {
    pub fn new(channel: Channel, depth: u32) -> Self {
        RxStream {
            channel,
            depth,
            state: RxState::Idle,
            buffer: VecDeque::new(),
            last_seen: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == RxState::Idle && self.buffer.is_empty()
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.state, RxState::Receiving { .. })
    }

    /// Length of a transfer waiting to be accepted.
    pub fn offered(&self) -> Option<u32> {
        match self.state {
            RxState::Offered { len } => Some(len),
            _ => None,
        }
    }

    fn on_start(&mut self, len: u32) {
        if self.state != RxState::Idle {
            warn!("{:?} rx: start while busy, ignored", self.channel);
            return;
        }
        self.state = RxState::Offered { len };
    }

    fn on_word(&mut self, data: u32, last: bool, out: &mut VecDeque<LinkSignal>) {
        if !self.is_receiving() || self.last_seen {
            warn!("{:?} rx: dropping stray word {data:#x}", self.channel);
            out.push_back(LinkSignal { channel: self.channel, kind: SignalKind::Credit(1) });
            return;
        }
        self.last_seen = last;
        self.buffer.push_back(data);
    }

    /// Grant the offered transfer. Returns its announced length.
    pub fn accept(&mut self, out: &mut VecDeque<LinkSignal>) -> Option<u32> {
        let RxState::Offered { len } = self.state else { return None };
        out.push_back(LinkSignal { channel: self.channel, kind: SignalKind::Ack { credits: self.depth } });
        self.last_seen = false;
        self.state = if len == 0 { RxState::Idle } else { RxState::Receiving { len, popped: 0 } };
        Some(len)
    }

    /// Take the next buffered word and return its credit.
    pub fn pop(&mut self, out: &mut VecDeque<LinkSignal>) -> Option<RxWord> {
        let RxState::Receiving { len, popped } = self.state else { return None };
        let data = self.buffer.pop_front()?;
        out.push_back(LinkSignal { channel: self.channel, kind: SignalKind::Credit(1) });
        let popped = popped + 1;
        let end = popped >= len || (self.last_seen && self.buffer.is_empty());
        if end {
            self.state = RxState::Idle;
            if !self.buffer.is_empty() {
                warn!("{:?} rx: {} words past the announced length dropped", self.channel, self.buffer.len());
                let n = self.buffer.len() as u32;
                self.buffer.clear();
                out.push_back(LinkSignal { channel: self.channel, kind: SignalKind::Credit(n) });
            }
        } else {
            self.state = RxState::Receiving { len, popped };
        }
        Some(RxWord { data, end })
    }
}

/// Both channels, both directions, as seen from one end of the link.
#[derive(Clone, Debug)]
pub struct LinkPort {
    cmd_tx: TxStream,
    data_tx: TxStream,
    cmd_rx: RxStream,
    data_rx: RxStream,
    outbox: VecDeque<LinkSignal>,
}

impl LinkPort {
    pub fn new(spec: &SystemSpec) -> Self {
        let beat = spec.beat();
        LinkPort {
            cmd_tx: TxStream::new(Channel::Command, beat),
            data_tx: TxStream::new(Channel::Data, beat),
            cmd_rx: RxStream::new(Channel::Command, spec.link_depth),
            data_rx: RxStream::new(Channel::Data, spec.link_depth),
            outbox: VecDeque::new(),
        }
    }

    fn tx_parts(&mut self, channel: Channel) -> (&mut TxStream, &mut VecDeque<LinkSignal>) {
        match channel {
            Channel::Command => (&mut self.cmd_tx, &mut self.outbox),
            Channel::Data => (&mut self.data_tx, &mut self.outbox),
        }
    }

    fn rx_parts(&mut self, channel: Channel) -> (&mut RxStream, &mut VecDeque<LinkSignal>) {
        match channel {
            Channel::Command => (&mut self.cmd_rx, &mut self.outbox),
            Channel::Data => (&mut self.data_rx, &mut self.outbox),
        }
    }

    fn rx(&self, channel: Channel) -> &RxStream {
        match channel {
            Channel::Command => &self.cmd_rx,
            Channel::Data => &self.data_rx,
        }
    }

    /// Apply a signal arriving from the other end.
    pub fn deliver(&mut self, sig: LinkSignal) {
        match sig.kind {
            SignalKind::Start { len } => self.rx_parts(sig.channel).0.on_start(len),
            SignalKind::Word { data, last } => {
                let (rx, out) = self.rx_parts(sig.channel);
                rx.on_word(data, last, out);
            }
            SignalKind::Ack { credits } => self.tx_parts(sig.channel).0.on_ack(credits),
            SignalKind::Credit(n) => self.tx_parts(sig.channel).0.on_credit(n),
        }
    }

    pub fn begin(&mut self, channel: Channel, words: Vec<u32>) -> bool {
        let (tx, out) = self.tx_parts(channel);
        tx.begin(words, out)
    }

    pub fn begin_with_len(&mut self, channel: Channel, words: Vec<u32>, len: u32) -> bool {
        let (tx, out) = self.tx_parts(channel);
        tx.begin_with_len(words, len, out)
    }

    pub fn tx_idle(&self, channel: Channel) -> bool {
        match channel {
            Channel::Command => self.cmd_tx.is_idle(),
            Channel::Data => self.data_tx.is_idle(),
        }
    }

    pub fn offered(&self, channel: Channel) -> Option<u32> {
        self.rx(channel).offered()
    }

    pub fn is_receiving(&self, channel: Channel) -> bool {
        self.rx(channel).is_receiving()
    }

    pub fn accept(&mut self, channel: Channel) -> Option<u32> {
        let (rx, out) = self.rx_parts(channel);
        rx.accept(out)
    }

    pub fn pop(&mut self, channel: Channel) -> Option<RxWord> {
        let (rx, out) = self.rx_parts(channel);
        rx.pop(out)
    }

    /// Advance both senders by one beat.
    pub fn poll(&mut self) {
        self.cmd_tx.poll(&mut self.outbox);
        self.data_tx.poll(&mut self.outbox);
    }

    /// Nothing in flight in either direction.
    pub fn is_quiet(&self) -> bool {
        self.cmd_tx.is_idle()
            && self.data_tx.is_idle()
            && self.cmd_rx.is_idle()
            && self.data_rx.is_idle()
            && self.outbox.is_empty()
    }

    /// Drain signals produced since the last call.
    pub fn take_signals(&mut self) -> Vec<LinkSignal> {
        self.outbox.drain(..).collect()
    }
}

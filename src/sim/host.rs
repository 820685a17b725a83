use std::sync::{Arc, Mutex};

use asynchronix::model::{Model, Output};
use log::warn;

use crate::host::HostMemory;
use crate::link::LinkSignal;
use crate::protocol::Command;

/// The far end of the page transfer link. The backing store is shared so
/// it can be inspected after the run.
pub struct HostModel {
    host: Arc<Mutex<HostMemory>>,
    pub o_link: Output<LinkSignal>,
}

impl HostModel {
    pub fn new(host: Arc<Mutex<HostMemory>>) -> Self {
        HostModel { host, o_link: Output::new() }
    }

    fn advance(&self) -> Vec<LinkSignal> {
        match self.host.lock() {
            Ok(mut host) => {
                host.step();
                host.take_link_signals()
            }
            Err(_) => {
                warn!("host memory poisoned");
                Vec::new()
            }
        }
    }

    pub async fn on_link(&mut self, sig: LinkSignal) {
        match self.host.lock() {
            Ok(mut host) => host.deliver(sig),
            Err(_) => warn!("host memory poisoned, {sig:?} lost"),
        }
    }

    pub async fn on_remote(&mut self, cmd: Command) {
        match self.host.lock() {
            Ok(mut host) => host.send_remote(cmd),
            Err(_) => warn!("host memory poisoned, {cmd} not sent"),
        }
    }

    pub async fn on_tick(&mut self, _: ()) {
        let signals = self.advance();
        for sig in signals {
            self.o_link.send(sig).await;
        }
    }
}

impl Model for HostModel {}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use asynchronix::model::{Model, Output};

use crate::common::{ClientInputs, ClientOutputs};
use crate::controller::{CacheController, CacheStats};
use crate::link::LinkSignal;

/// Wraps the controller: register interface towards the processor, link
/// port towards the host.
pub struct CacheModel {
    controller: CacheController,
    inputs: ClientInputs,
    stats: Arc<Mutex<CacheStats>>,
    idle: Arc<AtomicBool>,
    pub o_proc_resp: Output<ClientOutputs>,
    pub o_link: Output<LinkSignal>,
}

impl CacheModel {
    pub fn new(controller: CacheController, stats: Arc<Mutex<CacheStats>>, idle: Arc<AtomicBool>) -> Self {
        CacheModel {
            controller,
            inputs: ClientInputs::default(),
            stats,
            idle,
            o_proc_resp: Output::new(),
            o_link: Output::new(),
        }
    }

    pub async fn on_proc_req(&mut self, inputs: ClientInputs) {
        self.inputs = inputs;
    }

    pub async fn on_link(&mut self, sig: LinkSignal) {
        self.controller.deliver(sig);
    }

    pub async fn on_tick(&mut self, _: ()) {
        let resp = self.controller.step(&self.inputs);
        self.o_proc_resp.send(resp).await;
        for sig in self.controller.take_link_signals() {
            self.o_link.send(sig).await;
        }
    }

    pub async fn on_post_tick(&mut self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = *self.controller.stats();
        }
        self.idle.store(self.controller.is_idle(), Ordering::Relaxed);
    }
}

impl Model for CacheModel {}

use std::sync::Mutex;

use crate::packet::Packet;
use crate::transmit::Transmit;

/// Transmitter that keeps every packet it is handed.
#[derive(Default)]
pub struct Recorder {
    sent: Mutex<Vec<Packet>>,
}

impl Recorder {
    pub fn packets(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transmit for Recorder {
    fn transmit(&self, packet: &Packet) -> anyhow::Result<usize> {
        self.sent.lock().unwrap().push(packet.clone());
        Ok(packet.len())
    }
}

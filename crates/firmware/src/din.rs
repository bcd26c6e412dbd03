//! Plumbing for the DIN-MIDI serial port.
//!
//! The wire side of the bridge is a plain UART running at MIDI's fixed rate. Outbound traffic
//! goes through [`DinLink`], which exposes the transmit half to the architecture-agnostic
//! relay as a [`SerialSink`]; inbound traffic is read from the ring-buffered receive half
//! directly by the task loop.

use defmt::warn;
use embassy_stm32::{mode::Async, usart::UartTx};
use midibridge_lib::relay::SerialSink;

/// The DIN-MIDI wire rate. Fixed by the MIDI electrical specification.
pub const MIDI_BAUD: u32 = 31_250;

/// The transmit half of the DIN-MIDI port.
pub struct DinLink {
    tx: UartTx<'static, Async>,
}

impl DinLink {
    /// Wraps the UART transmit half.
    pub fn new(tx: UartTx<'static, Async>) -> Self {
        Self { tx }
    }
}

impl SerialSink for DinLink {
    fn transmit_ready(&self) -> bool {
        // blocking_write below spins on the transmit register itself, so the link is always
        // ready to be handed a byte.
        true
    }

    fn transmit_byte(&mut self, byte: u8) {
        if let Err(e) = self.tx.blocking_write(&[byte]) {
            warn!("DIN transmit error: {}", e);
        }
    }
}

//! Forwarding of received USB transfers to the serial MIDI wire.
//!
//! The host side of this device sends System Exclusive data in fixed-size transfers, with a
//! private span-marker convention demarcating how many SysEx bytes follow inside the chunk:
//! a 0x04 announces a span of three further bytes, a 0x05 a span of one. The markers are a
//! device-specific extension for chunk-boundary accounting, not part of USB-MIDI framing, and
//! they never reach the wire. Everything else in a received chunk is relayed verbatim, one
//! byte at a time.

use crate::status;

/// Span marker announcing that three SysEx bytes follow in this chunk.
pub const SPAN_THREE: u8 = 0x04;
/// Span marker announcing that one SysEx byte follows in this chunk.
pub const SPAN_ONE: u8 = 0x05;

/// Byte-level transmit capability of the serial MIDI link.
///
/// [`ChunkRelay::relay`] busy-waits on [`transmit_ready`][Self::transmit_ready] before every
/// byte. How the implementation actually waits for the link is its own concern; the relay
/// only requires that readiness eventually becomes true.
pub trait SerialSink {
    /// True when the link can accept one more byte.
    fn transmit_ready(&self) -> bool;

    /// Hands one byte to the link. Called only after [`transmit_ready`][Self::transmit_ready]
    /// reports true.
    fn transmit_byte(&mut self, byte: u8);
}

/// Relays received chunks to a [`SerialSink`], consuming the span markers that demarcate
/// SysEx runs inside a fixed-size transfer.
///
/// One `ChunkRelay` exists per outbound serial link; the span count it carries survives from
/// one chunk to the next, since a marked span may straddle a transfer boundary.
#[derive(Debug, Default)]
pub struct ChunkRelay {
    /// Bytes of the announced span not yet emitted.
    pending: u8,
}

impl ChunkRelay {
    /// Returns a relay with no outstanding span.
    pub fn new() -> Self {
        Self { pending: 0 }
    }

    /// Bytes of the announced span not yet emitted.
    pub fn pending(&self) -> u8 {
        self.pending
    }

    /// Scans `chunk` left to right, emitting it to `sink`. Returns the number of bytes
    /// emitted.
    ///
    /// Markers are recognized only while no announced span is outstanding, so marker-valued
    /// SysEx data bytes are never swallowed mid-span. An emitted End-of-Exclusive clears the
    /// outstanding span and stops the scan early; the rest of the chunk is discarded. The
    /// span count clamps at zero when data arrives without a governing marker, so it can
    /// never wrap.
    pub fn relay<S: SerialSink>(&mut self, chunk: &[u8], sink: &mut S) -> usize {
        let mut emitted = 0;
        for &byte in chunk {
            if self.pending == 0 {
                if byte == SPAN_THREE {
                    self.pending = 3;
                    continue;
                }
                if byte == SPAN_ONE {
                    self.pending = 1;
                    continue;
                }
            }

            while !sink.transmit_ready() {}
            sink.transmit_byte(byte);
            emitted += 1;
            self.pending = self.pending.saturating_sub(1);

            if byte == status::SYSEX_END {
                self.pending = 0;
                break;
            }
        }
        emitted
    }
}

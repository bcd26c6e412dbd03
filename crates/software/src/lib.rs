//! This crate contains architecture-agnostic logic for the midibridge, a device which connects
//! DIN-MIDI equipment to a USB host by translating between the raw [MIDI](https://midi.org/midi-1-0)
//! wire format (one byte at a time, framing implied by status bytes) and the fixed 4-byte event
//! packets of the [USB Device Class Definition for MIDI Devices](https://www.usb.org/document-library/usb-midi-devices-10).

#![deny(missing_docs)]
#![no_std]

pub mod configuration;

pub mod packet;

pub mod parser;

pub mod relay;

pub mod status;

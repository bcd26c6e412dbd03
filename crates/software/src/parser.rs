//! Streaming interpretation of the raw MIDI wire format.
//!
//! [`StreamParser`] consumes the inbound stream one byte at a time and reports, per byte,
//! whether a complete message has been recognized, a System Exclusive byte has passed through,
//! or the stream violated its own framing. Running status is honored so repeated messages may
//! omit their status byte, and real-time bytes are surfaced immediately without disturbing
//! whatever message they interleave with.
//!
//! Exactly one `StreamParser` exists per independent input stream; it is updated only by the
//! task that owns that stream.

use crate::status::{self, MessageKind};
use tinyvec::{ArrayVec, array_vec};

/// A complete MIDI message: a status byte followed by up to two data bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MidiMessage {
    bytes: ArrayVec<[u8; 3]>,
    kind: MessageKind,
}

impl MidiMessage {
    fn single(byte: u8, kind: MessageKind) -> Self {
        let mut msg = Self {
            bytes: array_vec!(),
            kind,
        };
        msg.bytes.push(byte);
        msg
    }

    /// The raw bytes of the message, status byte first.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// The status byte of the message.
    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// The category of the message.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MidiMessage {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "MidiMessage({=[u8]:#x})", self.bytes.as_slice());
    }
}

/// A single byte of a System Exclusive stream, surfaced as it arrives.
///
/// The stream's length is unknown in advance, so the parser does not buffer it; callers that
/// care about stream boundaries watch the `first` and `last` flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SysExByte {
    /// The byte itself. The 0xF0/0xF7 brackets are surfaced along with the data bytes.
    pub byte: u8,
    /// True exactly on the first data byte following Start-of-Exclusive.
    pub first: bool,
    /// True exactly on the End-of-Exclusive byte.
    pub last: bool,
}

/// The result of feeding one byte to [`StreamParser::parse`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseOutcome {
    /// The byte was consumed and state advanced, but nothing is ready to surface. Also
    /// returned in place of a result whose category the configured filter masks out.
    Pending,
    /// A complete message was recognized.
    Complete(MidiMessage),
    /// One byte of a System Exclusive stream passed through.
    SysEx(SysExByte),
}

/// Recoverable framing violations.
///
/// Both variants leave the parser in a state from which it resynchronizes on its own; the
/// caller decides whether to log, count, or ignore them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// A status byte other than End-of-Exclusive arrived while a System Exclusive stream was
    /// open. The partial stream is discarded and the offending byte starts a fresh message.
    UnterminatedSysEx,
    /// A data byte arrived with no message accumulating and no running status to frame it.
    /// The byte is discarded; parsing resumes on the next status byte.
    DataByteWithoutStatus,
}

/// Lifecycle of the System Exclusive stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum SysExState {
    #[default]
    Inactive,
    Active,
    /// The last stream ended abnormally: a new status arrived without a terminating 0xF7.
    Errored,
}

/// Streaming MIDI parser with running-status and System Exclusive tracking.
#[derive(Debug)]
pub struct StreamParser {
    /// In-flight message accumulation; `message[0]` is always the status byte once one is seen.
    message: ArrayVec<[u8; 3]>,
    expected_len: usize,
    running_status: Option<u8>,
    sysex: SysExState,
    /// Set when 0xF0 is consumed, cleared by the first data byte of the stream.
    sysex_first_pending: bool,
    sysex_len: usize,
    filter: MessageKind,
    pending_kind: MessageKind,
    parsed_kind: MessageKind,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// Returns a parser that surfaces every message category.
    pub fn new() -> Self {
        Self {
            message: array_vec!(),
            expected_len: 0,
            running_status: None,
            sysex: SysExState::Inactive,
            sysex_first_pending: false,
            sysex_len: 0,
            filter: MessageKind::all(),
            pending_kind: MessageKind::none(),
            parsed_kind: MessageKind::none(),
        }
    }

    /// Feeds one byte from the stream into the parser.
    pub fn parse(&mut self, byte: u8) -> Result<ParseOutcome, ParseError> {
        // Real-time bytes surface immediately and disturb nothing: not running status, not
        // SysEx mode, not a message accumulating across them.
        if status::is_realtime(byte) {
            let msg = MidiMessage::single(byte, MessageKind::RealTime);
            return Ok(self.surface(ParseOutcome::Complete(msg), MessageKind::RealTime));
        }

        if self.sysex == SysExState::Active {
            return self.parse_sysex_byte(byte);
        }

        if byte == status::SYSEX_START {
            self.enter_sysex();
            return Ok(self.surface(
                ParseOutcome::SysEx(SysExByte {
                    byte,
                    first: false,
                    last: false,
                }),
                MessageKind::SysEx,
            ));
        }

        if status::is_status(byte) {
            return Ok(self.begin_message(byte));
        }

        self.parse_data_byte(byte)
    }

    /// Replaces the message filter. Takes effect on the next call to [`parse`][Self::parse].
    pub fn set_filter(&mut self, mask: MessageKind) {
        self.filter = mask;
    }

    /// The filter consulted before surfacing any result.
    pub fn filter(&self) -> MessageKind {
        self.filter
    }

    /// True while a System Exclusive stream is open.
    pub fn is_sysex_active(&self) -> bool {
        self.sysex == SysExState::Active
    }

    /// True when the last System Exclusive stream ended abnormally.
    pub fn sysex_errored(&self) -> bool {
        self.sysex == SysExState::Errored
    }

    /// Count of data bytes seen in the current (or most recent) System Exclusive stream. The
    /// 0xF0/0xF7 brackets are not counted.
    pub fn sysex_len(&self) -> usize {
        self.sysex_len
    }

    /// Category of the last result surfaced through the filter.
    pub fn parsed_kind(&self) -> MessageKind {
        self.parsed_kind
    }

    /// Category of the message currently accumulating, if any.
    pub fn pending_kind(&self) -> MessageKind {
        self.pending_kind
    }

    /// Applies the filter to a would-be result. Masked categories yield [`ParseOutcome::Pending`];
    /// state has already advanced either way.
    fn surface(&mut self, outcome: ParseOutcome, kind: MessageKind) -> ParseOutcome {
        if self.filter.contains(kind) {
            self.parsed_kind = kind;
            outcome
        } else {
            ParseOutcome::Pending
        }
    }

    fn enter_sysex(&mut self) {
        // A SysEx start invalidates running status until an explicit status byte arrives
        // after the stream ends.
        self.running_status = None;
        self.message.clear();
        self.sysex = SysExState::Active;
        self.sysex_first_pending = true;
        self.sysex_len = 0;
        self.pending_kind = MessageKind::SysEx;
    }

    fn parse_sysex_byte(&mut self, byte: u8) -> Result<ParseOutcome, ParseError> {
        if byte == status::SYSEX_END {
            self.sysex = SysExState::Inactive;
            self.pending_kind = MessageKind::none();
            return Ok(self.surface(
                ParseOutcome::SysEx(SysExByte {
                    byte,
                    first: false,
                    last: true,
                }),
                MessageKind::SysEx,
            ));
        }

        if status::is_status(byte) {
            // Framing violation: the stream was abandoned without a terminating 0xF7. The
            // offending byte is reinterpreted as the start of a fresh message so parsing
            // resumes without losing it.
            self.sysex = SysExState::Errored;
            if byte == status::SYSEX_START {
                self.enter_sysex();
            } else {
                self.begin_message(byte);
            }
            return Err(ParseError::UnterminatedSysEx);
        }

        let first = self.sysex_first_pending;
        self.sysex_first_pending = false;
        self.sysex_len += 1;
        Ok(self.surface(
            ParseOutcome::SysEx(SysExByte {
                byte,
                first,
                last: false,
            }),
            MessageKind::SysEx,
        ))
    }

    /// Handles a non-real-time status byte seen outside SysEx mode.
    fn begin_message(&mut self, byte: u8) -> ParseOutcome {
        self.message.clear();

        match byte {
            status::SYSEX_END | 0xF4 | 0xF5 => {
                // A stray End-of-Exclusive or an undefined system common status introduces no
                // message; it cancels whatever was accumulating and invalidates running status.
                self.running_status = None;
                self.expected_len = 0;
                self.pending_kind = MessageKind::none();
                ParseOutcome::Pending
            }
            status::TUNE_REQUEST => {
                // Complete on its own. A zero-data status cannot frame later data bytes, so
                // it does not establish a running status.
                self.running_status = None;
                self.expected_len = 0;
                self.pending_kind = MessageKind::none();
                let msg = MidiMessage::single(byte, MessageKind::SystemCommon);
                self.surface(ParseOutcome::Complete(msg), MessageKind::SystemCommon)
            }
            _ => {
                self.expected_len = status::expected_len(byte);
                self.pending_kind = status::kind_of(byte);
                self.running_status = Some(byte);
                self.message.push(byte);
                ParseOutcome::Pending
            }
        }
    }

    fn parse_data_byte(&mut self, byte: u8) -> Result<ParseOutcome, ParseError> {
        if self.message.is_empty() {
            // Nothing accumulating: frame a new message from running status, or discard the
            // orphan and wait for the next status byte.
            let running = self
                .running_status
                .ok_or(ParseError::DataByteWithoutStatus)?;
            self.expected_len = status::expected_len(running);
            self.pending_kind = status::kind_of(running);
            self.message.push(running);
        }

        self.message.push(byte);
        if self.message.len() == self.expected_len {
            let msg = MidiMessage {
                bytes: self.message,
                kind: self.pending_kind,
            };
            // Keep the status byte so further data bytes repeat under the same running
            // status without an explicit status byte.
            self.message.truncate(1);
            return Ok(self.surface(ParseOutcome::Complete(msg), msg.kind));
        }

        Ok(ParseOutcome::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `bytes` and returns the outcome of the final byte, asserting every earlier byte
    /// parsed without error.
    fn feed(parser: &mut StreamParser, bytes: &[u8]) -> Result<ParseOutcome, ParseError> {
        let (last, head) = bytes.split_last().expect("at least one byte to feed");
        for &byte in head {
            parser.parse(byte).expect("lead-in bytes should parse");
        }
        parser.parse(*last)
    }

    fn complete_bytes(outcome: Result<ParseOutcome, ParseError>) -> ArrayVec<[u8; 3]> {
        match outcome {
            Ok(ParseOutcome::Complete(msg)) => msg.bytes,
            other => panic!("expected a complete message, got {:?}", other),
        }
    }

    #[test]
    fn realtime_is_complete_immediately() {
        let mut parser = StreamParser::new();
        for status in [0xF8, 0xFA, 0xFE, 0xFF] {
            let msg = complete_bytes(parser.parse(status));
            assert_eq!(&[status], msg.as_slice(), "Expected left but got right");
        }
        assert_eq!(MessageKind::RealTime, parser.parsed_kind());
    }

    #[test]
    fn tune_request_is_complete_immediately() {
        let mut parser = StreamParser::new();
        let outcome = parser.parse(0xF6);
        let msg = complete_bytes(outcome);
        assert_eq!(&[0xF6], msg.as_slice(), "Expected left but got right");
        assert_eq!(MessageKind::SystemCommon, parser.parsed_kind());
    }

    #[test]
    fn three_byte_channel_voice() {
        let mut parser = StreamParser::new();
        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0x90));
        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0x3C));
        let msg = complete_bytes(parser.parse(0x7F));
        assert_eq!(
            &[0x90, 0x3C, 0x7F],
            msg.as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn two_byte_channel_voice() {
        let mut parser = StreamParser::new();
        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0xC1));
        let msg = complete_bytes(parser.parse(0x05));
        assert_eq!(&[0xC1, 0x05], msg.as_slice(), "Expected left but got right");
    }

    #[test]
    fn song_position_is_three_bytes() {
        let mut parser = StreamParser::new();
        let msg = complete_bytes(feed(&mut parser, &[0xF2, 0x10, 0x20]));
        assert_eq!(
            &[0xF2, 0x10, 0x20],
            msg.as_slice(),
            "Expected left but got right"
        );
        assert_eq!(MessageKind::SystemCommon, parser.parsed_kind());
    }

    #[test]
    fn running_status_repeats_the_last_status() {
        let mut parser = StreamParser::new();
        feed(&mut parser, &[0x90, 0x3C, 0x7F]).expect("first message should parse");

        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0x40));
        let msg = complete_bytes(parser.parse(0x7F));
        assert_eq!(
            &[0x90, 0x40, 0x7F],
            msg.as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn realtime_does_not_disturb_accumulation() {
        let mut parser = StreamParser::new();
        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0x90));
        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0x3C));

        // a clock byte interleaves mid-message and surfaces on its own
        let clock = complete_bytes(parser.parse(0xF8));
        assert_eq!(&[0xF8], clock.as_slice());

        let msg = complete_bytes(parser.parse(0x7F));
        assert_eq!(
            &[0x90, 0x3C, 0x7F],
            msg.as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn orphan_data_byte_is_discarded_and_parsing_recovers() {
        let mut parser = StreamParser::new();
        assert_eq!(Err(ParseError::DataByteWithoutStatus), parser.parse(0x40));

        let msg = complete_bytes(feed(&mut parser, &[0x90, 0x3C, 0x7F]));
        assert_eq!(
            &[0x90, 0x3C, 0x7F],
            msg.as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn sysex_round_trip() {
        let mut parser = StreamParser::new();

        assert_eq!(
            Ok(ParseOutcome::SysEx(SysExByte {
                byte: 0xF0,
                first: false,
                last: false
            })),
            parser.parse(0xF0)
        );
        assert!(parser.is_sysex_active());

        assert_eq!(
            Ok(ParseOutcome::SysEx(SysExByte {
                byte: 0x01,
                first: true,
                last: false
            })),
            parser.parse(0x01)
        );
        assert_eq!(
            Ok(ParseOutcome::SysEx(SysExByte {
                byte: 0x02,
                first: false,
                last: false
            })),
            parser.parse(0x02)
        );
        assert_eq!(
            Ok(ParseOutcome::SysEx(SysExByte {
                byte: 0xF7,
                first: false,
                last: true
            })),
            parser.parse(0xF7)
        );

        assert!(!parser.is_sysex_active());
        assert!(!parser.sysex_errored());
        assert_eq!(2, parser.sysex_len(), "brackets should not be counted");
    }

    #[test]
    fn sysex_clears_running_status() {
        let mut parser = StreamParser::new();
        feed(&mut parser, &[0x90, 0x3C, 0x7F]).expect("note on should parse");
        feed(&mut parser, &[0xF0, 0x01, 0xF7]).expect("sysex should parse");

        // running status must stay cleared until a new explicit status byte arrives
        assert_eq!(Err(ParseError::DataByteWithoutStatus), parser.parse(0x40));

        let msg = complete_bytes(feed(&mut parser, &[0x90, 0x40, 0x7F]));
        assert_eq!(&[0x90, 0x40, 0x7F], msg.as_slice());
    }

    #[test]
    fn unterminated_sysex_reports_and_recovers() {
        let mut parser = StreamParser::new();
        parser.parse(0xF0).expect("sysex start should parse");
        parser.parse(0x01).expect("sysex data should parse");

        assert_eq!(Err(ParseError::UnterminatedSysEx), parser.parse(0x90));
        assert!(parser.sysex_errored());

        // the offending status byte opened a fresh message
        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0x3C));
        let msg = complete_bytes(parser.parse(0x7F));
        assert_eq!(
            &[0x90, 0x3C, 0x7F],
            msg.as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn realtime_interleaves_with_sysex() {
        let mut parser = StreamParser::new();
        parser.parse(0xF0).expect("sysex start should parse");

        let clock = complete_bytes(parser.parse(0xF8));
        assert_eq!(&[0xF8], clock.as_slice());
        assert!(parser.is_sysex_active(), "real time must not end the stream");

        assert_eq!(
            Ok(ParseOutcome::SysEx(SysExByte {
                byte: 0x01,
                first: true,
                last: false
            })),
            parser.parse(0x01)
        );
    }

    #[test]
    fn reserved_status_cancels_accumulation() {
        let mut parser = StreamParser::new();
        parser.parse(0x90).expect("status should parse");
        parser.parse(0x3C).expect("data should parse");

        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0xF5));

        // the cancelled message never completes and running status is gone
        assert_eq!(Err(ParseError::DataByteWithoutStatus), parser.parse(0x7F));
    }

    #[test]
    fn stray_eox_is_consumed_silently() {
        let mut parser = StreamParser::new();
        assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0xF7));
        assert!(!parser.is_sysex_active());
    }

    #[test]
    fn complete_messages_carry_their_kind() {
        let mut parser = StreamParser::new();
        match feed(&mut parser, &[0x90, 0x3C, 0x7F]) {
            Ok(ParseOutcome::Complete(msg)) => {
                assert_eq!(
                    MessageKind::ChannelVoice,
                    msg.kind(),
                    "Expected left but got right"
                );
            }
            other => panic!("expected a complete message, got {:?}", other),
        }
    }

    #[test]
    fn kind_observers_track_progress() {
        let mut parser = StreamParser::new();
        assert_eq!(MessageKind::none(), parser.pending_kind());

        parser.parse(0x90).expect("status should parse");
        assert_eq!(MessageKind::ChannelVoice, parser.pending_kind());

        feed(&mut parser, &[0x3C, 0x7F]).expect("data should parse");
        assert_eq!(MessageKind::ChannelVoice, parser.parsed_kind());
    }

    mod filtering {
        use super::*;

        #[test]
        fn masked_categories_yield_pending() {
            let mut parser = StreamParser::new();
            parser.set_filter(MessageKind::ChannelVoice);

            assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0xF8));
            assert_eq!(
                Ok(ParseOutcome::Pending),
                feed(&mut parser, &[0xF2, 0x10, 0x20])
            );

            let msg = complete_bytes(feed(&mut parser, &[0x90, 0x3C, 0x7F]));
            assert_eq!(&[0x90, 0x3C, 0x7F], msg.as_slice());
        }

        #[test]
        fn masked_messages_still_advance_state() {
            let mut parser = StreamParser::new();
            parser.set_filter(MessageKind::RealTime);

            // masked, but the note on must still establish running status
            assert_eq!(
                Ok(ParseOutcome::Pending),
                feed(&mut parser, &[0x90, 0x3C, 0x7F])
            );

            parser.set_filter(MessageKind::all());
            let msg = complete_bytes(feed(&mut parser, &[0x40, 0x7F]));
            assert_eq!(
                &[0x90, 0x40, 0x7F],
                msg.as_slice(),
                "Expected left but got right"
            );
        }

        #[test]
        fn sysex_bytes_respect_the_filter() {
            let mut parser = StreamParser::new();
            parser.set_filter(MessageKind::ChannelVoice);

            assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0xF0));
            assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0x01));
            assert_eq!(Ok(ParseOutcome::Pending), parser.parse(0xF7));
            assert!(!parser.is_sysex_active(), "state still advances under the mask");
        }

        #[test]
        fn reapplying_the_same_mask_is_idempotent() {
            let stream = [0x90, 0x3C, 0x7F, 0xF8, 0xF2, 0x10, 0x20];

            let mut once = StreamParser::new();
            once.set_filter(MessageKind::ChannelVoice | MessageKind::RealTime);

            let mut twice = StreamParser::new();
            twice.set_filter(MessageKind::ChannelVoice | MessageKind::RealTime);
            twice.set_filter(MessageKind::ChannelVoice | MessageKind::RealTime);

            for &byte in &stream {
                assert_eq!(
                    once.parse(byte),
                    twice.parse(byte),
                    "Expected left but got right"
                );
            }
        }
    }
}

//! midibridge is [Embassy](https://embassy.dev)-based firmware for a USB-MIDI to DIN-MIDI
//! bridge. It presents a standard USB-MIDI device to the host and a pair of DIN sockets to
//! the instrument side, running on the [Nucleo-F767ZI development
//! board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is powered by an
//! F7-series STM32 microcontroller.
//!
//! Traffic flows both ways. Transfers received from the host are relayed to the DIN output
//! one byte at a time, honoring the span markers that demarcate System Exclusive runs inside
//! a transfer. Bytes arriving on the DIN input are run through a streaming parser and the
//! recognized channel voice events are encoded as USB-MIDI event packets for the host. The
//! user button cycles a filter selecting which message categories the parser surfaces, and
//! the green LED blinks out the active selection.
//!
//! For details about the hardware or how to use the device, see the `README`.

#![no_std]
#![no_main]

mod din;

use crate::din::{DinLink, MIDI_BAUD};
use defmt::{panic, *};
use embassy_executor::Spawner;
use embassy_futures::select::select;
use embassy_stm32::{
    Config, bind_interrupts,
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    mode::Async,
    peripherals,
    time::Hertz,
    usart::{self, RingBufferedUartRx, Uart, UartTx},
    usb,
};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    watch::{AnonReceiver, Sender, Watch},
};
use embassy_time::Timer;
use embassy_usb::{
    Builder, UsbDevice,
    class::midi::{MidiClass, Receiver as MidiReceiver, Sender as MidiSender},
    driver::EndpointError,
};
use midibridge_lib::{
    configuration::{CycleSetting as _, FilterSelection},
    packet::encode_event,
    parser::{ParseOutcome, StreamParser},
    relay::ChunkRelay,
    status::{self, MessageKind},
};
use static_cell::StaticCell;
use wmidi::Note;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
        USART6 => usart::InterruptHandler<peripherals::USART6>;
    }
);

type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

const FILTER_RECEIVER_CNT: usize = 0;
type FilterSync = Watch<CriticalSectionRawMutex, FilterSelection, FILTER_RECEIVER_CNT>;
type FilterSender<'a> = Sender<'a, CriticalSectionRawMutex, FilterSelection, FILTER_RECEIVER_CNT>;
type FilterSpy<'a> = AnonReceiver<'a, CriticalSectionRawMutex, FilterSelection, FILTER_RECEIVER_CNT>;

/// Synchronizes the message filter selection across tasks.
static FILTER_SYNC: FilterSync = Watch::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing midibridge");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: most peripheral clocks are derived from their bus clock, but the 48MHz clock used for USB OTG FS
            // is derived from main PLL VCO (PLLQ clock) or PLLSAI VCO (PLLSAI clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let config = embassy_stm32::usb::Config::default();

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics
    let vendor_id = 0x1209;
    // product ID spells "mi" in ASCII, the first syllable the bridge carries in each direction
    let product_id = 0x6D69;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Pawpaw Works");
    config.product = Some("midibridge");
    // the bridge draws everything it needs from the host; the DIN side supplies no power
    config.self_powered = false;
    config.max_power = 100;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // Create classes on the builder.
    let class = MidiClass::new(&mut builder, 1, 1, 64);

    // Build the builder.
    let usb = builder.build();

    // The DIN sockets hang off USART6: PG14 drives the output socket, PG9 listens on the
    // input socket.
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = MIDI_BAUD;
    let uart = unwrap!(Uart::new(
        p.USART6,
        p.PG9,
        p.PG14,
        Irqs,
        p.DMA2_CH6,
        p.DMA2_CH1,
        uart_config,
    ));
    let (din_tx, din_rx) = uart.split();
    static DIN_RX_RING: StaticCell<[u8; 64]> = StaticCell::new();
    let din_rx = din_rx.into_ring_buffered(DIN_RX_RING.init([0; 64]));

    unwrap!(spawner.spawn(usb_task(usb)));

    let filter_sender = FILTER_SYNC.sender();
    filter_sender.send(FilterSelection::default());
    unwrap!(spawner.spawn(midi_task(
        class,
        din_tx,
        din_rx,
        FILTER_SYNC.anon_receiver()
    )));

    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    unwrap!(spawner.spawn(filter_input_task(button, filter_sender)));

    let green_led = Output::new(p.PB0, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(filter_display_task(green_led, FILTER_SYNC.anon_receiver())));
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

/// Task responsible for both directions of MIDI traffic.
///
/// The two directions share nothing but the USB connection, so each runs as its own loop for
/// the duration of a connection. The first loop to error ends the session (the other may be
/// parked waiting for traffic that will never come) and the task goes back to waiting.
#[embassy_executor::task]
async fn midi_task(
    class: MidiClass<'static, UsbDriver>,
    din_tx: UartTx<'static, Async>,
    mut din_rx: RingBufferedUartRx<'static>,
    mut filter: FilterSpy<'static>,
) -> ! {
    let (mut usb_tx, mut usb_rx) = class.split();
    let mut link = DinLink::new(din_tx);
    let mut relay = ChunkRelay::new();
    let mut parser = StreamParser::new();

    loop {
        usb_rx.wait_connection().await;
        info!("USB connected");
        let _ = select(
            host_to_din(&mut usb_rx, &mut relay, &mut link),
            din_to_host(&mut usb_tx, &mut din_rx, &mut parser, &mut filter),
        )
        .await;
        info!("USB disconnected");
    }
}

#[doc(hidden)]
struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}

/// Helper function which drains completed USB transfers into the DIN output.
///
/// Each transfer is at most 64 bytes; requesting the next read re-arms the endpoint for the
/// following transfer, overwriting the consumed buffer.
async fn host_to_din(
    usb_rx: &mut MidiReceiver<'static, UsbDriver>,
    relay: &mut ChunkRelay,
    link: &mut DinLink,
) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        let n = usb_rx.read_packet(&mut buf).await?;
        let emitted = relay.relay(&buf[..n], link);
        debug!("Relayed {} of {} received bytes to the DIN output", emitted, n);
    }
}

/// Helper function which interprets the DIN input and reports it to the host.
///
/// Bytes are fed to the streaming parser one at a time; completed channel voice events are
/// encoded as USB-MIDI event packets. Framing violations on the wire are logged and parsing
/// resumes on its own.
async fn din_to_host(
    usb_tx: &mut MidiSender<'static, UsbDriver>,
    din_rx: &mut RingBufferedUartRx<'static>,
    parser: &mut StreamParser,
    filter: &mut FilterSpy<'static>,
) -> Result<(), Disconnected> {
    let mut applied = filter.try_get().unwrap_or_default();
    parser.set_filter(applied.mask());

    let mut buf = [0; 16];
    loop {
        if let Some(selection) = filter.try_get() {
            if selection != applied {
                applied = selection;
                parser.set_filter(selection.mask());
                info!("Message filter set to {}", selection);
            }
        }

        let n = match din_rx.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("DIN receive error: {}", e);
                continue;
            }
        };

        for &byte in &buf[..n] {
            match parser.parse(byte) {
                Ok(ParseOutcome::Complete(message)) => {
                    // Only channel voice events have packet mappings; system common and
                    // real-time messages are consumed without reporting.
                    if message.kind() != MessageKind::ChannelVoice {
                        continue;
                    }
                    let bytes = message.bytes();
                    let data1 = bytes.get(1).copied().unwrap_or_default();
                    let data2 = bytes.get(2).copied().unwrap_or_default();
                    if let Some(packet) = encode_event(message.status(), data1, data2) {
                        usb_tx.write_packet(packet.bytes()).await?;
                        log_note_event(message.status(), data1, data2);
                    }
                }
                // SysEx pass-through to the host is not wired up yet; the stream is
                // consumed so it cannot corrupt the framing of what follows.
                Ok(ParseOutcome::SysEx(_)) | Ok(ParseOutcome::Pending) => {}
                Err(e) => {
                    warn!("MIDI framing error on the DIN input: {}", e);
                }
            }
        }
    }
}

/// Logs note events in performer-readable terms.
fn log_note_event(event_status: u8, data1: u8, data2: u8) {
    match event_status & 0xF0 {
        status::NOTE_ON => info!(
            "Reported NoteOn: note {}, velocity {}",
            Note::from_u8_lossy(data1).to_str(),
            data2
        ),
        status::NOTE_OFF => info!(
            "Reported NoteOff: note {}, velocity {}",
            Note::from_u8_lossy(data1).to_str(),
            data2
        ),
        _ => {}
    }
}

/// Handles button presses, cycling through the [`FilterSelection`] presets.
#[embassy_executor::task]
async fn filter_input_task(mut button: ExtiInput<'static>, sender: FilterSender<'static>) -> ! {
    let mut selection = FilterSelection::default();
    loop {
        button.wait_for_rising_edge().await;
        selection = selection.cycle();
        sender.send(selection);
    }
}

/// Provides a quick and dirty status indicator for the active [`FilterSelection`].
///
/// Each cycle is divided in half. The LED remains dark for one half. For the other, the LED
/// flashes N times, where N is one more than the index of the selected preset.
#[embassy_executor::task]
async fn filter_display_task(mut led: Output<'static>, mut filter: FilterSpy<'static>) -> ! {
    const CYCLE_MICROS: u64 = 1_000_000;

    loop {
        led.set_low();
        Timer::after_micros(CYCLE_MICROS).await;

        let selection = filter.try_get().unwrap_or_default();
        // the index starts at 0, so 1 is added or else the LED would never flash for the first preset
        let flash_cnt = (selection as u8).saturating_add(1);
        // mult by two to account for the "off" periods, sub 1 so the LED always starts and ends lit
        let animation_frames = flash_cnt * 2 - 1;
        let mut counter = animation_frames;
        while counter > 0 {
            led.toggle();
            Timer::after_micros(CYCLE_MICROS / u64::from(animation_frames)).await;
            counter -= 1;
        }
    }
}

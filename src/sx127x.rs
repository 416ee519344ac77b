//! Driver for SX1276/77/78/79 based boards. The radio is configured for
//! LoRa operation at open time and is then driven entirely through its
//! registers over SPI, with DIO0 signalling transmit and receive
//! completion.

pub mod config;
mod register;

use core::convert::Infallible;
use core::marker::PhantomData;

use bit_field::BitField;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::{Operation, SpiDevice};
use heapless::Vec;

use self::config::RadioConfig;
use self::register::{AsAddr, IRQMask, Register};

/// Silicon revision reported by all supported chips.
const VERSION_CHECK: u8 = 0x12;

/// Largest payload the 256-byte packet buffer can carry in one frame.
pub const MAX_PAYLOAD_LENGTH: usize = 255;

/// How long the reset line is held low, and how long the chip is given to
/// come back up afterwards.
const RESET_HOLD_MS: u32 = 10;

/// Transmit completion is polled at this interval, giving up after
/// [`TX_POLL_ATTEMPTS`] reads of the interrupt flags.
const TX_POLL_ATTEMPTS: usize = 100;
const TX_POLL_INTERVAL_MS: u32 = 1;

/// Single-shot receive verifies the mode actually changed, re-reading the
/// mode register up to this many times before giving up.
const MODE_CHANGE_ATTEMPTS: usize = 10;
const MODE_CHANGE_INTERVAL_MS: u32 = 25;

/// Packets decoded by the interrupt handler queue up to this depth before
/// the newest ones start being dropped.
const RX_QUEUE_DEPTH: usize = 4;

// Image calibration register, bit 0 gates the temperature monitor
// (0 = running, 1 = stopped).
const TEMP_MONITOR_MASK: u8 = 0xfe;
const TEMP_MONITOR_ON: u8 = 0x00;
const TEMP_MONITOR_OFF: u8 = 0x01;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<SPI, RESET, DIO0> {
    /// The chip reported a silicon revision this driver does not support.
    VersionMismatch(u8),
    /// Transmit-done was never flagged before polling gave up.
    TxTimeout,
    /// The mode register never reflected a requested mode change.
    ModeChangeTimeout,
    Spi(SPI),
    Reset(RESET),
    Dio0(DIO0),
}

use Error::*;

/// A packet decoded from the chip's buffer by the interrupt handler,
/// together with the signal quality of the reception.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceivedPacket {
    pub payload: Vec<u8, MAX_PAYLOAD_LENGTH>,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Signal to noise ratio in dB, in 0.25 dB steps.
    pub snr: f32,
}

/// An SX127x radio in LoRa mode.
///
/// The four hardware handles are taken over at [`open`](LoRa::open) and
/// handed back by [`close`](LoRa::close). Every method borrows `&self`, so
/// one instance can be shared between a foreground task and a task looping
/// on [`service_interrupts`](LoRa::service_interrupts).
pub struct LoRa<M: RawMutex, SPI, RESET, DIO0, DELAY> {
    chip: Mutex<M, Chip<SPI, RESET, DIO0>>,
    delay: Mutex<M, DELAY>,
    dio0: Mutex<M, DIO0>,
    packets: Channel<M, ReceivedPacket, RX_QUEUE_DEPTH>,
}

impl<M, SPI, RESET, DIO0, DELAY> LoRa<M, SPI, RESET, DIO0, DELAY>
where
    M: RawMutex,
    SPI: SpiDevice,
    RESET: OutputPin,
    DIO0: Wait,
    DELAY: DelayNs,
{
    /// Resets the chip, checks its version and pushes the whole
    /// configuration, leaving the radio in standby with clean interrupt
    /// flags.
    pub async fn open(
        spi: SPI,
        reset: RESET,
        dio0: DIO0,
        mut delay: DELAY,
        config: RadioConfig,
    ) -> Result<Self, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = Chip {
            spi,
            reset,
            config,
            implicit_header: false,
            packet_index: 0,
            watching: false,
            pending_tx: None,
            finished_tx: None,
            next_ticket: 0,
            _dio0: PhantomData,
        };

        chip.reset.set_low().map_err(Reset)?;
        delay.delay_ms(RESET_HOLD_MS).await;
        chip.reset.set_high().map_err(Reset)?;
        delay.delay_ms(RESET_HOLD_MS).await;

        let version = chip.read_register(Register::Version).await?;
        if version != VERSION_CHECK {
            return Err(VersionMismatch(version));
        }
        debug!("chip version {}", version);

        chip.set_mode(RadioMode::Sleep).await?;
        if config.invert_iq {
            let mut invert_iq = chip.read_register(Register::InvertIq).await?;
            invert_iq.set_bit(6, true);
            chip.write_register(Register::InvertIq, invert_iq).await?;
        }
        chip.set_frequency(config.frequency).await?;
        chip.set_spreading_factor(config.spreading_factor).await?;
        chip.set_signal_bandwidth(config.signal_bandwidth).await?;
        chip.set_coding_rate(config.coding_rate).await?;
        chip.set_preamble_length(config.preamble_length).await?;
        chip.set_sync_word(config.sync_word).await?;
        chip.set_crc(config.crc).await?;
        chip.write_register(Register::FifoTxBaseAddr, 0x00).await?;
        chip.write_register(Register::FifoRxBaseAddr, 0x00).await?;
        chip.set_lna_boost(true).await?;
        // auto agc on
        chip.write_register(Register::ModemConfig3, 0x04).await?;
        chip.set_tx_power(config.tx_power).await?;
        chip.set_mode(RadioMode::Stdby).await?;
        chip.write_register(Register::IrqFlags, 0x00).await?;

        Ok(LoRa {
            chip: Mutex::new(chip),
            delay: Mutex::new(delay),
            dio0: Mutex::new(dio0),
            packets: Channel::new(),
        })
    }

    /// Hands the SPI device, reset pin, DIO0 pin and delay back to the
    /// caller. The radio is left in whatever mode it was in.
    pub fn close(self) -> (SPI, RESET, DIO0, DELAY) {
        let chip = self.chip.into_inner();
        (
            chip.spi,
            chip.reset,
            self.dio0.into_inner(),
            self.delay.into_inner(),
        )
    }

    /// Reads the silicon revision.
    pub async fn version(&self) -> Result<u8, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip.lock().await.read_register(Register::Version).await
    }

    /// Sets the carrier frequency in Hz.
    pub async fn set_frequency(
        &self,
        frequency: f64,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip.lock().await.set_frequency(frequency).await
    }

    /// Sets the spreading factor, clamped to the chip's range of 6 to 12.
    pub async fn set_spreading_factor(
        &self,
        spreading_factor: u8,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip
            .lock()
            .await
            .set_spreading_factor(spreading_factor)
            .await
    }

    /// Sets the signal bandwidth in Hz. The chip only supports a fixed set
    /// of bandwidths, so the requested value is rounded up to the nearest
    /// supported one.
    pub async fn set_signal_bandwidth(
        &self,
        signal_bandwidth: f64,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip
            .lock()
            .await
            .set_signal_bandwidth(signal_bandwidth)
            .await
    }

    /// Sets the coding rate from a ratio such as `4.0 / 5.0`. The largest
    /// denominator whose ratio still covers the request is used.
    pub async fn set_coding_rate(
        &self,
        coding_rate: f64,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip.lock().await.set_coding_rate(coding_rate).await
    }

    /// Sets the preamble length in symbols.
    pub async fn set_preamble_length(
        &self,
        preamble_length: u16,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip
            .lock()
            .await
            .set_preamble_length(preamble_length)
            .await
    }

    /// Sets the sync word. `0x34` is reserved for public LoRaWAN networks.
    pub async fn set_sync_word(
        &self,
        sync_word: u8,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip.lock().await.set_sync_word(sync_word).await
    }

    /// Enables or disables payload CRC generation and checking.
    pub async fn set_crc(
        &self,
        crc: bool,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip.lock().await.set_crc(crc).await
    }

    /// Sets the transmit power in dBm on the PA_BOOST pin, clamped to the
    /// 2 to 17 dBm range.
    pub async fn set_tx_power(
        &self,
        tx_power: i32,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip.lock().await.set_tx_power(tx_power).await
    }

    /// Switches the LNA boost for the high frequency port on or off.
    pub async fn set_lna_boost(
        &self,
        boost: bool,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.chip.lock().await.set_lna_boost(boost).await
    }

    /// Puts the radio in sleep mode.
    pub async fn sleep(&self) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.set_mode(RadioMode::Sleep).await
    }

    /// Puts the radio in standby mode.
    pub async fn standby(&self) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.set_mode(RadioMode::Stdby).await
    }

    /// Requests an operating mode. Entry into single-shot receive is
    /// verified against the mode register, since the chip refuses it while
    /// busy; all other transitions are fire and forget.
    pub async fn set_mode(
        &self,
        mode: RadioMode,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = self.chip.lock().await;
        chip.set_mode(mode).await?;
        if mode == RadioMode::RxSingle {
            self.confirm_rx_single(&mut chip).await?;
        }
        Ok(())
    }

    /// Transmits a payload, blocking until the chip flags completion.
    ///
    /// The payload is truncated to [`MAX_PAYLOAD_LENGTH`] bytes. Completion
    /// is polled once per millisecond; if the interrupt handler is running
    /// it usually resolves the wait first, the polling is the fallback for
    /// setups without a wired DIO0 line.
    pub async fn write(
        &self,
        payload: &[u8],
        implicit_header: bool,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let ticket;
        {
            let mut chip = self.chip.lock().await;
            chip.watching = false;
            chip.finished_tx = None;
            chip.set_header_mode(implicit_header).await?;
            chip.set_mode(RadioMode::Stdby).await?;
            chip.write_register(Register::FifoAddrPtr, 0x00).await?;
            let length = payload.len().min(MAX_PAYLOAD_LENGTH);
            chip.write_register(Register::PayloadLength, length as u8)
                .await?;
            chip.write_burst(Register::Fifo, &payload[..length]).await?;
            // DIO0 rises on tx-done
            chip.write_register(Register::DioMapping1, 0x40).await?;
            ticket = chip.take_ticket();
            trace!("transmitting {} bytes", length);
            if let Err(error) = chip.set_mode(RadioMode::Tx).await {
                chip.pending_tx = None;
                return Err(error);
            }
        }

        let result = self.poll_tx_done(ticket).await;
        if result.is_err() {
            // a stale ticket would capture the next dio0 edge
            let mut chip = self.chip.lock().await;
            if chip.pending_tx == Some(ticket) {
                chip.pending_tx = None;
            }
        }
        result
    }

    /// Arms continuous receive mode. Decoded packets are queued by the
    /// interrupt handler and picked up with [`next_packet`](LoRa::next_packet).
    ///
    /// `length` selects implicit header mode with that fixed payload
    /// length; `None` uses explicit headers. A length of zero is not
    /// accepted by the chip and falls back to explicit headers.
    pub async fn set_continuous_receive_mode(
        &self,
        length: Option<u8>,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = self.chip.lock().await;
        chip.watching = true;
        let implicit = length.is_some_and(|length| length > 0);
        chip.set_header_mode(implicit).await?;
        if implicit {
            chip.write_register(Register::PayloadLength, length.unwrap_or(0))
                .await?;
        }
        // DIO0 rises on rx-done
        chip.write_register(Register::DioMapping1, 0x00).await?;
        chip.set_mode(RadioMode::RxContinuous).await
    }

    /// Polls for a packet in single-shot receive mode.
    ///
    /// Returns the payload length as soon as an uncorrupted packet is
    /// waiting in the chip's buffer, to be drained with
    /// [`available`](LoRa::available) and [`read`](LoRa::read). Otherwise
    /// makes sure the radio is in single-shot receive and returns `None`.
    pub async fn receive_single(
        &self,
        length: Option<u8>,
    ) -> Result<Option<u8>, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = self.chip.lock().await;
        chip.watching = false;
        chip.implicit_header = length.is_some_and(|length| length > 0);
        if chip.implicit_header {
            chip.write_register(Register::PayloadLength, length.unwrap_or(0))
                .await?;
        }

        let flags = chip.read_register(Register::IrqFlags).await?;
        chip.write_register(Register::IrqFlags, flags).await?;

        if (flags & IRQMask::RxDone.addr()) != 0 && (flags & IRQMask::PayloadCrcError.addr()) == 0
        {
            chip.packet_index = 0;
            let length = if chip.implicit_header {
                chip.read_register(Register::PayloadLength).await?
            } else {
                chip.read_register(Register::RxNbBytes).await?
            };
            let rx_addr = chip.read_register(Register::FifoRxCurrentAddr).await?;
            chip.write_register(Register::FifoAddrPtr, rx_addr).await?;
            chip.set_mode(RadioMode::Stdby).await?;
            return Ok(Some(length));
        }

        let target = RadioMode::LongRangeMode.addr() | RadioMode::RxSingle.addr();
        if chip.read_register(Register::OpMode).await? != target {
            chip.write_register(Register::FifoAddrPtr, 0x00).await?;
            chip.set_mode(RadioMode::RxSingle).await?;
            self.confirm_rx_single(&mut chip).await?;
        }
        Ok(None)
    }

    /// How many bytes of the current packet are still unread.
    pub async fn available(&self) -> Result<u8, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = self.chip.lock().await;
        let received = chip.read_register(Register::RxNbBytes).await?;
        Ok(received.saturating_sub(chip.packet_index))
    }

    /// Reads the next byte of the current packet out of the chip's buffer,
    /// or `None` once the packet is exhausted.
    pub async fn read(&self) -> Result<Option<u8>, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = self.chip.lock().await;
        let received = chip.read_register(Register::RxNbBytes).await?;
        if received.saturating_sub(chip.packet_index) == 0 {
            return Ok(None);
        }
        chip.packet_index += 1;
        let byte = chip.read_register(Register::Fifo).await?;
        Ok(Some(byte))
    }

    /// Waits for the next packet queued by continuous receive mode.
    pub async fn next_packet(&self) -> ReceivedPacket {
        self.packets.receive().await
    }

    /// Takes a queued packet without waiting.
    pub fn try_next_packet(&self) -> Option<ReceivedPacket> {
        self.packets.try_receive().ok()
    }

    /// Waits for one rising edge on DIO0 and services it.
    ///
    /// A pending transmission is completed by clearing the interrupt flags
    /// and releasing the transmit wait. Otherwise, with continuous receive
    /// armed, the packet is read out of the chip's buffer and queued.
    /// Edges with neither in progress are consumed without touching the
    /// bus.
    pub async fn handle_interrupt(
        &self,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        {
            let mut dio0 = self.dio0.lock().await;
            dio0.wait_for_rising_edge().await.map_err(Dio0)?;
        }
        self.on_dio0_rise().await
    }

    /// Services DIO0 edges until an error occurs. Meant to run as its own
    /// task next to the foreground use of the radio.
    pub async fn service_interrupts(
        &self,
    ) -> Result<Infallible, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        loop {
            self.handle_interrupt().await?;
        }
    }

    /// Measures the chip temperature in degrees Celsius.
    ///
    /// The sensor only runs in the FSK modes, so the radio is briefly
    /// taken out of LoRa mode. The previous operating mode is restored
    /// even if the measurement itself fails.
    pub async fn read_temperature(
        &self,
    ) -> Result<i16, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = self.chip.lock().await;
        let saved_mode = chip.read_register(Register::OpMode).await?;
        let measured = self.measure_temperature(&mut chip).await;
        let restored = chip.write_register(Register::OpMode, saved_mode).await;
        let raw = measured?;
        restored?;
        let degrees = convert_temperature(raw, chip.config.temperature_offset);
        debug!("temperature {} C", degrees);
        Ok(degrees)
    }

    /// Reads a byte of wideband RSSI noise, usable as an entropy source.
    pub async fn read_random(&self) -> Result<u8, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let byte = self
            .chip
            .lock()
            .await
            .read_register(Register::RssiWideband)
            .await?;
        trace!("wideband rssi byte {}", byte);
        Ok(byte)
    }

    async fn poll_tx_done(
        &self,
        ticket: u16,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        for _ in 0..TX_POLL_ATTEMPTS {
            {
                let mut chip = self.chip.lock().await;
                if chip.finished_tx == Some(ticket) {
                    chip.finished_tx = None;
                    return Ok(());
                }
                let flags = chip.read_register(Register::IrqFlags).await?;
                if (flags & IRQMask::TxDone.addr()) != 0 {
                    chip.write_register(Register::IrqFlags, IRQMask::TxDone.addr())
                        .await?;
                    chip.pending_tx = None;
                    return Ok(());
                }
            }
            // chip lock released, so a concurrent interrupt handler can
            // resolve the ticket while this poll waits
            self.delay.lock().await.delay_ms(TX_POLL_INTERVAL_MS).await;
        }
        Err(TxTimeout)
    }

    async fn measure_temperature(
        &self,
        chip: &mut Chip<SPI, RESET, DIO0>,
    ) -> Result<u8, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        chip.write_register(Register::OpMode, RadioMode::LongRangeMode.addr())
            .await?;
        chip.write_register(Register::OpMode, RadioMode::Sleep.addr())
            .await?;
        chip.write_register(Register::OpMode, RadioMode::FsRx.addr())
            .await?;
        let calibration = chip.read_register(Register::ImageCalibration).await?;
        chip.write_register(
            Register::ImageCalibration,
            (calibration & TEMP_MONITOR_MASK) | TEMP_MONITOR_ON,
        )
        .await?;
        self.delay.lock().await.delay_ms(1).await;
        let calibration = chip.read_register(Register::ImageCalibration).await?;
        chip.write_register(
            Register::ImageCalibration,
            (calibration & TEMP_MONITOR_MASK) | TEMP_MONITOR_OFF,
        )
        .await?;
        chip.write_register(Register::OpMode, RadioMode::Sleep.addr())
            .await?;
        chip.read_register(Register::Temperature).await
    }

    async fn on_dio0_rise(&self) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut chip = self.chip.lock().await;
        trace!("dio0 rising edge");

        if let Some(ticket) = chip.pending_tx.take() {
            let flags = chip.read_register(Register::IrqFlags).await?;
            chip.write_register(Register::IrqFlags, flags).await?;
            chip.finished_tx = Some(ticket);
            return Ok(());
        }
        if !chip.watching {
            return Ok(());
        }

        let flags = chip.read_register(Register::IrqFlags).await?;
        chip.write_register(Register::IrqFlags, flags).await?;
        let rx_addr = chip.read_register(Register::FifoRxCurrentAddr).await?;
        chip.write_register(Register::FifoAddrPtr, rx_addr).await?;
        let length = if chip.implicit_header {
            chip.read_register(Register::PayloadLength).await?
        } else {
            chip.read_register(Register::RxNbBytes).await?
        };
        let mut payload = Vec::new();
        // a byte register cannot exceed the vec capacity
        payload.resize(length as usize, 0).ok();
        chip.read_burst(Register::Fifo, &mut payload).await?;
        let rssi = packet_rssi(
            chip.read_register(Register::PktRssiValue).await?,
            chip.config.frequency,
        );
        let snr = packet_snr(chip.read_register(Register::PktSnrValue).await?);
        chip.write_register(Register::FifoAddrPtr, 0x00).await?;

        if (flags & IRQMask::PayloadCrcError.addr()) != 0 {
            trace!("dropping packet with failed crc");
            return Ok(());
        }
        debug!("received {} bytes, rssi {} dBm", length, rssi);
        if self
            .packets
            .try_send(ReceivedPacket { payload, rssi, snr })
            .is_err()
        {
            warn!("receive queue full, dropping packet");
        }
        Ok(())
    }

    async fn confirm_rx_single(
        &self,
        chip: &mut Chip<SPI, RESET, DIO0>,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let target = RadioMode::LongRangeMode.addr() | RadioMode::RxSingle.addr();
        for _ in 0..MODE_CHANGE_ATTEMPTS {
            if chip.read_register(Register::OpMode).await? == target {
                return Ok(());
            }
            self.delay
                .lock()
                .await
                .delay_ms(MODE_CHANGE_INTERVAL_MS)
                .await;
        }
        Err(ModeChangeTimeout)
    }
}

/// The chip behind the driver's mutex: the bus codec, the register
/// sequences and the state the interrupt handler shares with the
/// foreground.
struct Chip<SPI, RESET, DIO0> {
    spi: SPI,
    reset: RESET,
    config: RadioConfig,
    implicit_header: bool,
    packet_index: u8,
    /// Whether continuous receive is armed, so DIO0 edges carry packets.
    watching: bool,
    /// Ticket of the transmission DIO0 should complete, if one is in
    /// flight.
    pending_tx: Option<u16>,
    finished_tx: Option<u16>,
    next_ticket: u16,
    _dio0: PhantomData<DIO0>,
}

impl<SPI, RESET, DIO0> Chip<SPI, RESET, DIO0>
where
    SPI: SpiDevice,
    RESET: OutputPin,
    DIO0: Wait,
{
    async fn read_register(
        &mut self,
        reg: Register,
    ) -> Result<u8, Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut value = [0];
        self.spi
            .transaction(&mut [
                Operation::Write(&[reg.addr() & 0x7f]),
                Operation::Read(&mut value),
            ])
            .await
            .map_err(Spi)?;
        Ok(value[0])
    }

    async fn read_burst(
        &mut self,
        reg: Register,
        buffer: &mut [u8],
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.spi
            .transaction(&mut [
                Operation::Write(&[reg.addr() & 0x7f]),
                Operation::Read(buffer),
            ])
            .await
            .map_err(Spi)
    }

    async fn write_register(
        &mut self,
        reg: Register,
        value: u8,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.spi
            .transaction(&mut [Operation::Write(&[reg.addr() | 0x80, value])])
            .await
            .map_err(Spi)
    }

    async fn write_burst(
        &mut self,
        reg: Register,
        bytes: &[u8],
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.spi
            .transaction(&mut [
                Operation::Write(&[reg.addr() | 0x80]),
                Operation::Write(bytes),
            ])
            .await
            .map_err(Spi)
    }

    async fn set_mode(
        &mut self,
        mode: RadioMode,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.write_register(
            Register::OpMode,
            RadioMode::LongRangeMode.addr() | mode.addr(),
        )
        .await
    }

    async fn set_frequency(
        &mut self,
        frequency: f64,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.config.frequency = frequency;
        let frf = config::frf(frequency);
        self.write_burst(
            Register::FrfMsb,
            &[(frf >> 16) as u8, (frf >> 8) as u8, frf as u8],
        )
        .await
    }

    async fn set_spreading_factor(
        &mut self,
        spreading_factor: u8,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let spreading_factor = spreading_factor.clamp(6, 12);
        self.config.spreading_factor = spreading_factor;
        // sf6 needs the alternate detection settings
        let (optimize, threshold) = config::detection_pair(spreading_factor);
        self.write_register(Register::DetectionOptimize, optimize)
            .await?;
        self.write_register(Register::DetectionThreshold, threshold)
            .await?;
        let modem_config_2 = self.read_register(Register::ModemConfig2).await?;
        self.write_register(
            Register::ModemConfig2,
            (modem_config_2 & 0x0f) | (spreading_factor << 4),
        )
        .await
    }

    async fn set_signal_bandwidth(
        &mut self,
        signal_bandwidth: f64,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let code = config::bandwidth_code(signal_bandwidth);
        self.config.signal_bandwidth = config::nominal_bandwidth(code);
        let modem_config_1 = self.read_register(Register::ModemConfig1).await?;
        self.write_register(Register::ModemConfig1, (modem_config_1 & 0x0f) | (code << 4))
            .await
    }

    async fn set_coding_rate(
        &mut self,
        coding_rate: f64,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let denominator = config::coding_rate_denominator(coding_rate);
        self.config.coding_rate = 4.0 / f64::from(denominator);
        let modem_config_1 = self.read_register(Register::ModemConfig1).await?;
        self.write_register(
            Register::ModemConfig1,
            (modem_config_1 & 0xf1) | ((denominator - 4) << 1),
        )
        .await
    }

    async fn set_preamble_length(
        &mut self,
        preamble_length: u16,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.config.preamble_length = preamble_length;
        self.write_burst(Register::PreambleMsb, &preamble_length.to_be_bytes())
            .await
    }

    async fn set_sync_word(
        &mut self,
        sync_word: u8,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.config.sync_word = sync_word;
        self.write_register(Register::SyncWord, sync_word).await
    }

    async fn set_crc(
        &mut self,
        crc: bool,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.config.crc = crc;
        let mut modem_config_2 = self.read_register(Register::ModemConfig2).await?;
        modem_config_2.set_bit(2, crc);
        self.write_register(Register::ModemConfig2, modem_config_2)
            .await
    }

    async fn set_tx_power(
        &mut self,
        tx_power: i32,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.config.tx_power = tx_power.clamp(2, 17);
        self.write_register(Register::PaConfig, config::pa_config(tx_power))
            .await
    }

    async fn set_lna_boost(
        &mut self,
        boost: bool,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        let mut lna = self.read_register(Register::Lna).await?;
        lna.set_bits(0..2, if boost { 0b11 } else { 0b00 });
        self.write_register(Register::Lna, lna).await
    }

    async fn set_header_mode(
        &mut self,
        implicit: bool,
    ) -> Result<(), Error<SPI::Error, RESET::Error, DIO0::Error>> {
        self.implicit_header = implicit;
        let mut modem_config_1 = self.read_register(Register::ModemConfig1).await?;
        modem_config_1.set_bit(0, implicit);
        self.write_register(Register::ModemConfig1, modem_config_1)
            .await
    }

    fn take_ticket(&mut self) -> u16 {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.pending_tx = Some(ticket);
        ticket
    }
}

fn packet_rssi(raw: u8, frequency: f64) -> i16 {
    // the low frequency port has a different rssi offset
    let offset = if frequency < 868e6 { 164 } else { 157 };
    i16::from(raw) - offset
}

fn packet_snr(raw: u8) -> f32 {
    f32::from(raw as i8) * 0.25
}

fn convert_temperature(raw: u8, offset: i16) -> i16 {
    let degrees = if raw > 128 {
        255 - i16::from(raw)
    } else {
        -i16::from(raw)
    };
    degrees + offset
}

/// Operating modes of the radio, all used together with
/// [`LongRangeMode`](RadioMode::LongRangeMode) to stay in LoRa mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    LongRangeMode = 0x80,
    Sleep = 0x00,
    Stdby = 0x01,
    FsTx = 0x02,
    Tx = 0x03,
    FsRx = 0x04,
    RxContinuous = 0x05,
    RxSingle = 0x06,
}

impl AsAddr for RadioMode {
    /// Returns the address of the mode.
    fn addr(self) -> u8 {
        self as u8
    }
}

use super::register::{AsAddr, PaConfig};

/// Crystal oscillator frequency of the radio module, in Hz.
const FXOSC: f64 = 32_000_000.0;

/// Operating parameters pushed to the chip when the driver is opened.
///
/// Every field has an explicit default; construct with struct-update syntax
/// to override a subset:
///
/// ```ignore
/// let config = RadioConfig {
///     frequency: 433.9e6,
///     spreading_factor: 9,
///     ..RadioConfig::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioConfig {
    /// Carrier frequency in Hz. I.E. 915 MHz must be used for North America.
    /// Check regulation for your area.
    pub frequency: f64,
    /// Spreading factor, clamped to 6..=12. A factor of 6 requires implicit
    /// header mode on both ends of the link.
    pub spreading_factor: u8,
    /// Signal bandwidth in Hz, rounded up to the nearest supported step.
    pub signal_bandwidth: f64,
    /// Forward-error-correction ratio, one of 4/5, 4/6, 4/7 or 4/8.
    pub coding_rate: f64,
    /// Preamble length in symbols.
    pub preamble_length: u16,
    /// Sync word; 0x12 for private networks, 0x34 for LoRaWAN.
    pub sync_word: u8,
    /// Transmit power in dBm on the PA_BOOST pin, clamped to 2..=17.
    pub tx_power: i32,
    /// Hardware CRC check on received payloads.
    pub crc: bool,
    /// Invert IQ polarity, for talking to gateways that transmit inverted.
    pub invert_iq: bool,
    /// Offset in degrees Celsius added to every temperature reading.
    pub temperature_offset: i16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            frequency: 915e6,
            spreading_factor: 7,
            signal_bandwidth: 125e3,
            coding_rate: 4.0 / 5.0,
            preamble_length: 8,
            sync_word: 0x12,
            tx_power: 17,
            crc: false,
            invert_iq: false,
            temperature_offset: 0,
        }
    }
}

/// Frequency synthesizer word: `floor(frequency / FXOSC * 2^19)`, of which
/// the low three bytes are written big-endian to the Frf register block.
pub(crate) fn frf(frequency: f64) -> u32 {
    (frequency / FXOSC * (1 << 19) as f64) as u32
}

/// Bandwidth bucket code for the top four bits of ModemConfig1.
pub(crate) fn bandwidth_code(hz: f64) -> u8 {
    match hz {
        b if b <= 7.8e3 => 0,
        b if b <= 10.4e3 => 1,
        b if b <= 15.6e3 => 2,
        b if b <= 20.8e3 => 3,
        b if b <= 31.25e3 => 4,
        b if b <= 41.7e3 => 5,
        b if b <= 62.5e3 => 6,
        b if b <= 125e3 => 7,
        b if b <= 250e3 => 8,
        _ => 9,
    }
}

/// Nominal bandwidth in Hz for a bucket code, the value the chip actually
/// uses regardless of what was requested.
pub(crate) fn nominal_bandwidth(code: u8) -> f64 {
    match code {
        0 => 7.8e3,
        1 => 10.4e3,
        2 => 15.6e3,
        3 => 20.8e3,
        4 => 31.25e3,
        5 => 41.7e3,
        6 => 62.5e3,
        7 => 125e3,
        8 => 250e3,
        _ => 500e3,
    }
}

/// Denominator for the 4/x coding rate: the largest of 8, 7, 6, 5 whose
/// ratio still covers the requested one, so the chip never applies less
/// error correction than asked for.
pub(crate) fn coding_rate_denominator(ratio: f64) -> u8 {
    if ratio <= 4.0 / 8.0 {
        8
    } else if ratio <= 4.0 / 7.0 {
        7
    } else if ratio <= 4.0 / 6.0 {
        6
    } else {
        5
    }
}

/// DetectionOptimize and DetectionThreshold register pair for a spreading
/// factor. Factor 6 uses dedicated values (Semtech SX1276/77/78/79 4.1.1.2.).
pub(crate) fn detection_pair(sf: u8) -> (u8, u8) {
    if sf == 6 {
        (0xc5, 0x0c)
    } else {
        (0xc3, 0x0a)
    }
}

/// PaConfig register value for a PA_BOOST output level, clamped to 2..=17 dBm.
pub(crate) fn pa_config(level: i32) -> u8 {
    let level = level.clamp(2, 17);
    PaConfig::PaBoost.addr() | (level - 2) as u8
}

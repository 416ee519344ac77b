//! An async platform-agnostic driver for Semtech SX1276/77/78/79 based
//! LoRa boards, built on the `embedded-hal-async` traits.
//!
//! The driver owns the SPI device, the reset pin, the DIO0 interrupt line
//! and a delay source, and exposes the radio through [`LoRa`]. All methods
//! take `&self`; an internal mutex serializes bus access so the transmit
//! path, the receive path and the interrupt handler can run as separate
//! tasks sharing one handle.
#![cfg_attr(not(any(test, feature = "mock")), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod sx127x;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use sx127x::config::RadioConfig;
pub use sx127x::{Error, LoRa, RadioMode, ReceivedPacket, MAX_PAYLOAD_LENGTH};

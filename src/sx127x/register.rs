#![allow(dead_code)]

#[derive(Clone, Copy)]
pub enum Register {
    Fifo = 0x00,
    OpMode = 0x01,
    FrfMsb = 0x06,
    FrfMid = 0x07,
    FrfLsb = 0x08,
    PaConfig = 0x09,
    Lna = 0x0c,
    FifoAddrPtr = 0x0d,
    FifoTxBaseAddr = 0x0e,
    FifoRxBaseAddr = 0x0f,
    FifoRxCurrentAddr = 0x10,
    IrqFlags = 0x12,
    RxNbBytes = 0x13,
    PktRssiValue = 0x1a,
    PktSnrValue = 0x1b,
    ModemConfig1 = 0x1d,
    ModemConfig2 = 0x1e,
    PreambleMsb = 0x20,
    PreambleLsb = 0x21,
    PayloadLength = 0x22,
    ModemConfig3 = 0x26,
    RssiWideband = 0x2c,
    DetectionOptimize = 0x31,
    InvertIq = 0x33,
    DetectionThreshold = 0x37,
    SyncWord = 0x39,
    ImageCalibration = 0x3b,
    Temperature = 0x3c,
    DioMapping1 = 0x40,
    Version = 0x42,
}

#[derive(Clone, Copy)]
pub enum PaConfig {
    PaBoost = 0x80,
    PaOutputRfoPin = 0,
}

#[derive(Clone, Copy)]
pub enum IRQMask {
    TxDone = 0x08,
    PayloadCrcError = 0x20,
    RxDone = 0x40,
}

pub trait AsAddr {
    fn addr(self) -> u8;
}

impl AsAddr for Register {
    fn addr(self) -> u8 {
        self as u8
    }
}

impl AsAddr for PaConfig {
    fn addr(self) -> u8 {
        self as u8
    }
}

impl AsAddr for IRQMask {
    fn addr(self) -> u8 {
        self as u8
    }
}

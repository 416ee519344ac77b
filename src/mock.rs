//! In-memory fakes of the radio's collaborators, for tests and host-side
//! development.
//!
//! The fake chip is a plain register file with just enough behavior bolted
//! on: interrupt flags clear on write-back, address zero streams the
//! packet buffer, and burst accesses walk consecutive addresses. Tests
//! arrange registers and scripted reads through [`MockRadio`] and inspect
//! the traffic the driver produced afterwards.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::convert::Infallible;
use std::future::{poll_fn, Future};
use std::rc::Rc;
use std::task::{Poll, Waker};

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::ErrorKind;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::{Operation, SpiDevice};

const FIFO_ADDR: u8 = 0x00;
const IRQ_FLAGS_ADDR: u8 = 0x12;
const VERSION_ADDR: u8 = 0x42;

struct MockState {
    regs: [u8; 128],
    /// One-shot read values, served before the register file.
    scripted: BTreeMap<u8, VecDeque<u8>>,
    reads: Vec<u8>,
    writes: Vec<(u8, u8)>,
    fifo_tx: Vec<u8>,
    fifo_rx: VecDeque<u8>,
    delays_ns: Vec<u32>,
    reset_levels: Vec<bool>,
    edges: usize,
    edge_waker: Option<Waker>,
    failing_transfers: usize,
}

impl MockState {
    fn new() -> Self {
        let mut regs = [0; 128];
        // a freshly reset chip reports its silicon revision
        regs[VERSION_ADDR as usize] = 0x12;
        MockState {
            regs,
            scripted: BTreeMap::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            fifo_tx: Vec::new(),
            fifo_rx: VecDeque::new(),
            delays_ns: Vec::new(),
            reset_levels: Vec::new(),
            edges: 0,
            edge_waker: None,
            failing_transfers: 0,
        }
    }

    fn serve_read(&mut self, addr: u8) -> u8 {
        self.reads.push(addr);
        if addr == FIFO_ADDR {
            return self.fifo_rx.pop_front().unwrap_or(0);
        }
        if let Some(queue) = self.scripted.get_mut(&addr) {
            if let Some(value) = queue.pop_front() {
                return value;
            }
        }
        self.regs[addr as usize]
    }

    fn apply_write(&mut self, addr: u8, value: u8) {
        if addr == FIFO_ADDR {
            self.fifo_tx.push(value);
            return;
        }
        self.writes.push((addr, value));
        if addr == IRQ_FLAGS_ADDR {
            // interrupt flags clear on write-back
            self.regs[addr as usize] &= !value;
        } else {
            self.regs[addr as usize] = value;
        }
    }
}

/// Handle over the fake chip shared by the collaborator fakes.
pub struct MockRadio {
    state: Rc<RefCell<MockState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        MockRadio {
            state: Rc::new(RefCell::new(MockState::new())),
        }
    }

    /// The SPI device, reset pin, DIO0 pin and delay backed by this fake.
    pub fn parts(&self) -> (MockSpi, MockPin, MockDio0, MockDelay) {
        (
            MockSpi {
                state: self.state.clone(),
            },
            MockPin {
                state: self.state.clone(),
            },
            MockDio0 {
                state: self.state.clone(),
            },
            MockDelay {
                state: self.state.clone(),
            },
        )
    }

    /// Current value of a register in the fake's file.
    pub fn register(&self, addr: u8) -> u8 {
        self.state.borrow().regs[addr as usize]
    }

    pub fn set_register(&self, addr: u8, value: u8) {
        self.state.borrow_mut().regs[addr as usize] = value;
    }

    /// Scripts a one-shot read, served before the register file.
    pub fn queue_read(&self, addr: u8, value: u8) {
        self.state
            .borrow_mut()
            .scripted
            .entry(addr)
            .or_default()
            .push_back(value);
    }

    /// Every register write in order, bursts flattened. Packet buffer
    /// traffic is tracked separately in [`transmitted`](MockRadio::transmitted).
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.state.borrow().writes.clone()
    }

    /// The values written to one register, in order.
    pub fn writes_to(&self, addr: u8) -> Vec<u8> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, value)| *value)
            .collect()
    }

    /// The address of every register byte read, in order.
    pub fn reads(&self) -> Vec<u8> {
        self.state.borrow().reads.clone()
    }

    /// Bytes the driver burst into the packet buffer.
    pub fn transmitted(&self) -> Vec<u8> {
        self.state.borrow().fifo_tx.clone()
    }

    /// Stages bytes to be served from the packet buffer.
    pub fn load_receive_payload(&self, payload: &[u8]) {
        self.state.borrow_mut().fifo_rx.extend(payload.iter().copied());
    }

    /// Latches one rising edge on DIO0, waking a parked waiter.
    pub fn raise_dio0(&self) {
        let waker = {
            let mut state = self.state.borrow_mut();
            state.edges += 1;
            state.edge_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Makes the next SPI transaction fail.
    pub fn fail_next_transfer(&self) {
        self.state.borrow_mut().failing_transfers += 1;
    }

    /// Nanoseconds of every delay requested, in order.
    pub fn delays(&self) -> Vec<u32> {
        self.state.borrow().delays_ns.clone()
    }

    /// Levels driven onto the reset pin, in order.
    pub fn reset_levels(&self) -> Vec<bool> {
        self.state.borrow().reset_levels.clone()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

/// Error produced by a scripted transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSpiError;

impl embedded_hal::spi::Error for MockSpiError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Fake SPI device speaking the chip's register protocol.
pub struct MockSpi {
    state: Rc<RefCell<MockState>>,
}

impl embedded_hal::spi::ErrorType for MockSpi {
    type Error = MockSpiError;
}

impl SpiDevice for MockSpi {
    async fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.failing_transfers > 0 {
            state.failing_transfers -= 1;
            return Err(MockSpiError);
        }

        let mut ops = operations.iter_mut();
        let (header, inline_data) = match ops.next() {
            Some(Operation::Write(bytes)) if !bytes.is_empty() => (bytes[0], &bytes[1..]),
            _ => panic!("transactions must open with an address byte"),
        };
        let mut addr = header & 0x7f;

        if header & 0x80 != 0 {
            for &value in inline_data {
                state.apply_write(addr, value);
                if addr != FIFO_ADDR {
                    addr += 1;
                }
            }
            for op in ops {
                match op {
                    Operation::Write(bytes) => {
                        for &value in bytes.iter() {
                            state.apply_write(addr, value);
                            if addr != FIFO_ADDR {
                                addr += 1;
                            }
                        }
                    }
                    _ => panic!("write transactions cannot read"),
                }
            }
        } else {
            for op in ops {
                match op {
                    Operation::Read(buffer) => {
                        for slot in buffer.iter_mut() {
                            *slot = state.serve_read(addr);
                            if addr != FIFO_ADDR {
                                addr += 1;
                            }
                        }
                    }
                    _ => panic!("read transactions only carry reads after the address"),
                }
            }
        }
        Ok(())
    }
}

/// Fake reset pin recording the levels driven onto it.
pub struct MockPin {
    state: Rc<RefCell<MockState>>,
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().reset_levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().reset_levels.push(true);
        Ok(())
    }
}

/// Fake DIO0 line releasing latched rising edges.
pub struct MockDio0 {
    state: Rc<RefCell<MockState>>,
}

impl embedded_hal::digital::ErrorType for MockDio0 {
    type Error = Infallible;
}

impl Wait for MockDio0 {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        poll_fn(|cx| {
            let mut state = self.state.borrow_mut();
            if state.edges > 0 {
                state.edges -= 1;
                Poll::Ready(Ok(()))
            } else {
                state.edge_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        })
        .await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.wait_for_rising_edge().await
    }
}

/// Fake delay recording every wait. Each delay yields once, so a
/// concurrently polled task gets a chance to run per interval.
pub struct MockDelay {
    state: Rc<RefCell<MockState>>,
}

impl MockDelay {
    async fn record(&mut self, ns: u32) {
        self.state.borrow_mut().delays_ns.push(ns);
        yield_once().await;
    }
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.record(ns).await;
    }

    async fn delay_us(&mut self, us: u32) {
        self.record(us.saturating_mul(1_000)).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.record(ms.saturating_mul(1_000_000)).await;
    }
}

fn yield_once() -> impl Future<Output = ()> {
    let mut yielded = false;
    poll_fn(move |cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn register_writes_land_in_the_file() {
        let mock = MockRadio::new();
        let (mut spi, _, _, _) = mock.parts();
        block_on(spi.transaction(&mut [Operation::Write(&[0x89, 0x5a])])).unwrap();
        assert_eq!(mock.register(0x09), 0x5a);
        assert_eq!(mock.writes(), [(0x09, 0x5a)]);
    }

    #[test]
    fn scripted_reads_are_served_before_the_file() {
        let mock = MockRadio::new();
        mock.set_register(0x1d, 0x09);
        mock.queue_read(0x1d, 0x07);
        let (mut spi, _, _, _) = mock.parts();
        let mut value = [0];
        block_on(spi.transaction(&mut [Operation::Write(&[0x1d]), Operation::Read(&mut value)]))
            .unwrap();
        assert_eq!(value[0], 0x07);
        block_on(spi.transaction(&mut [Operation::Write(&[0x1d]), Operation::Read(&mut value)]))
            .unwrap();
        assert_eq!(value[0], 0x09);
        assert_eq!(mock.reads(), [0x1d, 0x1d]);
    }

    #[test]
    fn interrupt_flags_clear_on_write_back() {
        let mock = MockRadio::new();
        mock.set_register(0x12, 0x48);
        let (mut spi, _, _, _) = mock.parts();
        block_on(spi.transaction(&mut [Operation::Write(&[0x92, 0x08])])).unwrap();
        assert_eq!(mock.register(0x12), 0x40);
    }

    #[test]
    fn burst_writes_walk_the_register_file() {
        let mock = MockRadio::new();
        let (mut spi, _, _, _) = mock.parts();
        block_on(spi.transaction(&mut [
            Operation::Write(&[0x86]),
            Operation::Write(&[0xe4, 0xc0, 0x00]),
        ]))
        .unwrap();
        assert_eq!(mock.register(0x06), 0xe4);
        assert_eq!(mock.register(0x07), 0xc0);
        assert_eq!(mock.register(0x08), 0x00);
    }

    #[test]
    fn packet_buffer_streams_are_kept_apart() {
        let mock = MockRadio::new();
        let (mut spi, _, _, _) = mock.parts();
        block_on(spi.transaction(&mut [
            Operation::Write(&[0x80]),
            Operation::Write(&[1, 2, 3]),
        ]))
        .unwrap();
        assert_eq!(mock.transmitted(), [1, 2, 3]);

        mock.load_receive_payload(&[9, 8]);
        let mut buffer = [0; 2];
        block_on(spi.transaction(&mut [Operation::Write(&[0x00]), Operation::Read(&mut buffer)]))
            .unwrap();
        assert_eq!(buffer, [9, 8]);
    }

    #[test]
    fn scripted_failures_surface_as_errors() {
        let mock = MockRadio::new();
        mock.fail_next_transfer();
        let (mut spi, _, _, _) = mock.parts();
        let result = block_on(spi.transaction(&mut [Operation::Write(&[0x81, 0x00])]));
        assert_eq!(result, Err(MockSpiError));
        // the failure is consumed
        block_on(spi.transaction(&mut [Operation::Write(&[0x81, 0x00])])).unwrap();
    }

    #[test]
    fn dio0_edges_are_latched() {
        let mock = MockRadio::new();
        let (_, _, mut dio0, _) = mock.parts();
        mock.raise_dio0();
        block_on(dio0.wait_for_rising_edge()).unwrap();
    }
}

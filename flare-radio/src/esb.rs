//! A simplified, no-ACK Enhanced ShockBurst link: RX/TX mode switching,
//! temporary TX-while-RX borrow-and-revert, and a single-frame send/receive
//! path driven entirely from inside a radio timeslot.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use heapless::Vec;

use flare_sched::{Label, SchedulerHandle, WorkCallback};

use crate::addressing::RadioAddress;
use crate::constants::TX_WAIT_TIMEOUT_US;
use crate::tx_power::pct_to_dbm;

/// Maximum ESB payload length minus the 3-byte length/pipe/ack header the
/// original protocol reserves even though this design never uses pipes or
/// ACKs.
pub const MAX_PAYLOAD_LEN: usize = 252;

/// Maps the logical channel number (0..50) callers configure to the
/// physical register value the radio expects (0..100, 2 per logical
/// channel).
const fn physical_channel(channel: u8) -> u8 {
    channel * 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Rx,
    Tx,
}

/// Physical layer framing. NRF variants use Nordic's proprietary framing;
/// BLE variants reuse the BLE PHY's framing to share silicon with a BLE
/// stack running in the same radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phy {
    Nrf1M,
    Nrf2M,
    Ble1M,
    Ble2M,
}

/// A single ESB payload, with RSSI attached on receive.
#[derive(Debug, Clone)]
pub struct Frame {
    buf: Vec<u8, MAX_PAYLOAD_LEN>,
    pub rssi: Option<i8>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            rssi: None,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(bytes).map_err(|_| ())?;
        Ok(Self { buf, rssi: None })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        MAX_PAYLOAD_LEN
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration applied to the radio before a slot starts using it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EsbConfig {
    pub mode: Mode,
    pub addr_rx: RadioAddress,
    pub addr_tx: RadioAddress,
    pub channel: u8,
    pub phy: Phy,
    pub tx_power_pct: u8,
}

/// How a send attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
    /// The radio never signalled completion before [`TX_WAIT_TIMEOUT_US`]
    /// elapsed.
    TimedOut,
}

/// The register-level radio operations the ESB engine drives. A real board
/// support package implements this against actual radio peripheral
/// registers; tests use an in-memory double.
pub trait RadioBackend {
    fn set_addr_rx(&mut self, addr: RadioAddress);
    fn set_addr_tx(&mut self, addr: RadioAddress);
    fn set_channel(&mut self, channel: u8);
    fn set_phy(&mut self, phy: Phy);
    fn set_tx_power(&mut self, dbm: i8);

    fn start_rx(&mut self);
    fn start_tx(&mut self, frame: &Frame);
    fn stop(&mut self);

    /// Blocks (or simulates blocking) for up to `timeout_us` for the
    /// in-flight transmission to complete. Returns `None` on timeout.
    fn wait_tx_complete(&mut self, timeout_us: u64) -> Option<bool>;

    /// Drains any frame(s) the radio received since the last call.
    fn take_received(&mut self) -> Option<Frame>;
}

/// The ESB protocol engine: owns mode-switching and the borrow-and-revert
/// semantics for sending while in RX mode.
pub struct Esb<R: RadioBackend> {
    backend: R,
    config: EsbConfig,
    running: bool,
    on_rx: Option<Box<dyn FnMut(Frame)>>,
}

impl<R: RadioBackend + 'static> Esb<R> {
    pub fn new(backend: R, config: EsbConfig) -> Self {
        Self {
            backend,
            config,
            running: false,
            on_rx: None,
        }
    }

    pub fn config(&self) -> EsbConfig {
        self.config
    }

    pub fn set_addr_rx(&mut self, addr: RadioAddress) {
        self.config.addr_rx = addr;
        self.backend.set_addr_rx(addr);
    }

    pub fn set_addr_tx(&mut self, addr: RadioAddress) {
        self.config.addr_tx = addr;
        self.backend.set_addr_tx(addr);
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.config.channel = channel;
        self.backend.set_channel(physical_channel(channel));
    }

    pub fn set_phy(&mut self, phy: Phy) {
        self.config.phy = phy;
        self.backend.set_phy(phy);
    }

    pub fn set_tx_power_pct(&mut self, pct: u8) {
        self.config.tx_power_pct = pct;
        self.backend.set_tx_power(pct_to_dbm(pct));
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.config.mode == mode {
            return;
        }
        if self.running {
            self.backend.stop();
            self.config.mode = mode;
            self.apply_mode();
        } else {
            self.config.mode = mode;
        }
    }

    /// Called once at slot start: applies the full configuration and starts
    /// the radio in its configured mode.
    pub fn start(&mut self) {
        self.backend.set_addr_rx(self.config.addr_rx);
        self.backend.set_addr_tx(self.config.addr_tx);
        self.backend.set_channel(physical_channel(self.config.channel));
        self.backend.set_phy(self.config.phy);
        self.backend.set_tx_power(pct_to_dbm(self.config.tx_power_pct));
        self.running = true;
        self.apply_mode();
    }

    /// Called at slot end: stops whatever direction is active.
    pub fn stop(&mut self) {
        if self.running {
            self.backend.stop();
            self.running = false;
        }
    }

    fn apply_mode(&mut self) {
        match self.config.mode {
            Mode::Rx => self.backend.start_rx(),
            Mode::Tx => {
                // TX is armed lazily by `send`; nothing to pre-start.
            }
        }
    }

    /// Sends `frame`. If currently in RX mode, temporarily switches to TX,
    /// sends, then reverts to RX — the client never observes the borrow.
    pub fn send(&mut self, frame: &Frame) -> TxStatus {
        let was_rx = self.config.mode == Mode::Rx;
        if was_rx {
            self.backend.stop();
            self.backend.set_addr_tx(self.config.addr_tx);
        }

        self.backend.start_tx(frame);
        let status = match self.backend.wait_tx_complete(TX_WAIT_TIMEOUT_US) {
            Some(true) => TxStatus::Success,
            Some(false) => TxStatus::Failed,
            None => TxStatus::TimedOut,
        };

        if was_rx {
            self.backend.set_addr_rx(self.config.addr_rx);
            self.backend.start_rx();
        }

        status
    }

    /// Returns an empty frame ready for a caller to fill in before handing
    /// it to [`Esb::send`].
    pub fn get_message_to_send(&self) -> Frame {
        Frame::new()
    }

    /// Registers the callback invoked with each frame the radio receives.
    /// Delivery is deferred onto the scheduler (see [`Esb::poll_and_dispatch`])
    /// rather than run synchronously off the radio ISR.
    pub fn set_callback_on_rx(&mut self, callback: Box<dyn FnMut(Frame)>) {
        self.on_rx = Some(callback);
    }

    fn run_rx_callback(&mut self, frame: Frame) {
        if let Some(cb) = self.on_rx.as_mut() {
            cb(frame);
        }
    }

    /// Drains one received frame from the backend, if any, and queues
    /// delivery to the registered on-rx callback as scheduler work. Meant to
    /// be called from the radio's receive-interrupt handler once per
    /// notification; only meaningful in RX mode.
    pub fn poll_and_dispatch(this: &Rc<RefCell<Self>>, scheduler: &mut dyn SchedulerHandle) {
        let frame = this.borrow_mut().backend.take_received();
        let frame = match frame {
            Some(frame) => frame,
            None => return,
        };
        let cloned = this.clone();
        let cb: WorkCallback = Box::new(move |_sched: &mut dyn SchedulerHandle| {
            cloned.borrow_mut().run_rx_callback(frame);
        });
        let _ = scheduler.queue_work(Label::from("esb-rx"), cb);
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockRadio {
        addr_rx: RadioAddress,
        addr_tx: RadioAddress,
        tx_log: Vec<&'static str, 16>,
        next_tx_result: Option<bool>,
        rx_queue: VecDeque<Frame>,
    }

    impl MockRadio {
        fn new() -> Self {
            Self {
                addr_rx: RadioAddress(0),
                addr_tx: RadioAddress(0),
                tx_log: Vec::new(),
                next_tx_result: Some(true),
                rx_queue: VecDeque::new(),
            }
        }
    }

    impl RadioBackend for MockRadio {
        fn set_addr_rx(&mut self, addr: RadioAddress) {
            self.addr_rx = addr;
        }
        fn set_addr_tx(&mut self, addr: RadioAddress) {
            self.addr_tx = addr;
        }
        fn set_channel(&mut self, _channel: u8) {}
        fn set_phy(&mut self, _phy: Phy) {}
        fn set_tx_power(&mut self, _dbm: i8) {}

        fn start_rx(&mut self) {
            let _ = self.tx_log.push("start_rx");
        }
        fn start_tx(&mut self, _frame: &Frame) {
            let _ = self.tx_log.push("start_tx");
        }
        fn stop(&mut self) {
            let _ = self.tx_log.push("stop");
        }
        fn wait_tx_complete(&mut self, _timeout_us: u64) -> Option<bool> {
            self.next_tx_result
        }
        fn take_received(&mut self) -> Option<Frame> {
            self.rx_queue.pop_front()
        }
    }

    fn config() -> EsbConfig {
        EsbConfig {
            mode: Mode::Rx,
            addr_rx: RadioAddress(1),
            addr_tx: RadioAddress(2),
            channel: 10,
            phy: Phy::Nrf1M,
            tx_power_pct: 50,
        }
    }

    #[test]
    fn send_while_rx_borrows_and_reverts() {
        let mut esb = Esb::new(MockRadio::new(), config());
        esb.start();

        let frame = Frame::from_slice(&[1, 2, 3]).unwrap();
        let status = esb.send(&frame);
        assert_eq!(status, TxStatus::Success);

        // The engine must end back in RX mode transparently.
        assert_eq!(esb.config().mode, Mode::Rx);
        let log = &esb.backend.tx_log;
        assert_eq!(
            log.as_slice(),
            &["start_rx", "stop", "start_tx", "start_rx"]
        );
    }

    #[test]
    fn send_timeout_is_reported_without_panicking() {
        let mut radio = MockRadio::new();
        radio.next_tx_result = None;
        let mut esb = Esb::new(radio, config());
        esb.start();

        let frame = Frame::from_slice(&[9]).unwrap();
        assert_eq!(esb.send(&frame), TxStatus::TimedOut);
    }

    #[test]
    fn tx_mode_does_not_borrow() {
        let mut cfg = config();
        cfg.mode = Mode::Tx;
        let mut esb = Esb::new(MockRadio::new(), cfg);
        esb.start();

        let frame = Frame::from_slice(&[7]).unwrap();
        esb.send(&frame);

        assert_eq!(esb.backend.tx_log.as_slice(), &["start_tx"]);
    }

    #[test]
    fn received_frame_reaches_the_on_rx_callback_via_the_scheduler() {
        use flare_sched::semaphore::StdSemaphore;
        use flare_sched::Scheduler;
        use flare_time::StdMonotonicSource;

        let mut radio = MockRadio::new();
        radio.rx_queue.push_back(Frame::from_slice(&[5, 6, 7]).unwrap());
        let esb = Rc::new(RefCell::new(Esb::new(radio, config())));
        esb.borrow_mut().start();

        let received: Rc<RefCell<Option<Frame>>> = Rc::new(RefCell::new(None));
        let received2 = received.clone();
        esb.borrow_mut().set_callback_on_rx(Box::new(move |frame: Frame| {
            *received2.borrow_mut() = Some(frame);
        }));

        let mut sched: Scheduler<StdMonotonicSource, StdSemaphore, 8, 8, 4> =
            Scheduler::new(StdMonotonicSource::new(), StdSemaphore::new());

        Esb::poll_and_dispatch(&esb, &mut sched);
        assert!(received.borrow().is_none(), "delivery must wait for the scheduler to run");

        sched.tick();
        assert_eq!(received.borrow().as_ref().unwrap().as_slice(), &[5, 6, 7]);
    }

    #[test]
    fn poll_and_dispatch_is_a_no_op_with_nothing_received() {
        use flare_sched::semaphore::StdSemaphore;
        use flare_sched::Scheduler;
        use flare_time::StdMonotonicSource;

        let esb = Rc::new(RefCell::new(Esb::new(MockRadio::new(), config())));
        let mut sched: Scheduler<StdMonotonicSource, StdSemaphore, 8, 8, 4> =
            Scheduler::new(StdMonotonicSource::new(), StdSemaphore::new());

        Esb::poll_and_dispatch(&esb, &mut sched);
        assert_eq!(sched.stats().handled_work, 0);
    }
}

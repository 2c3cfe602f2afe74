//! Facade crate: owns one scheduler, one radio timeslot session, one ESB
//! link and one GATT server, and wires them together the way a board support
//! crate wires `dot15d4-driver`/`dot15d4-frame`/`dot15d4-util` underneath
//! `dot15d4`'s `Device`.
//!
//! [`Node`] does not itself decide policy — it is generic over every
//! hardware-facing trait the lower crates define, so board support code
//! supplies the monotonic clock, sleep semaphore, radio backend, arbiter and
//! link-layer stack, and `Node` just forwards calls to the right owned
//! collaborator.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::rc::Rc;
use core::cell::RefCell;

pub use flare_gatt as gatt;
pub use flare_radio as radio;
pub use flare_sched as sched;
pub use flare_time as time;
pub use flare_util as util;

use flare_gatt::server::{AttLinkLayer, ConnHandle, GattServer, ReadOutcome, TransactionMode, WriteError};
use flare_gatt::{CharacteristicId, Service};
use flare_radio::esb::{Esb, EsbConfig, Frame, RadioBackend, TxStatus};
use flare_radio::timeslot::{ArbiterApi, SessionCallbacks, SessionState, TimeslotSession};
use flare_sched::{Label, Scheduler, SchedulerHandle, TimerId, TimerSpec, WorkCallback};
use flare_time::MonotonicSource;

/// Owns the four subsystems a node needs and forwards the public API each
/// lower crate exposes. Board support code is responsible for constructing
/// the generic parameters (a [`MonotonicSource`], a
/// [`flare_sched::SleepSemaphore`], a [`RadioBackend`], an [`ArbiterApi`], a
/// [`SessionCallbacks`] and an [`AttLinkLayer`]) against real hardware.
pub struct Node<M, S, R, A, C, L, const HIGH_CAP: usize, const LOW_CAP: usize, const STATS_HIST: usize>
where
    M: MonotonicSource,
    S: flare_sched::SleepSemaphore,
    R: RadioBackend + 'static,
    A: ArbiterApi,
    C: SessionCallbacks,
    L: AttLinkLayer + 'static,
{
    pub scheduler: Scheduler<M, S, HIGH_CAP, LOW_CAP, STATS_HIST>,
    pub esb: Rc<RefCell<Esb<R>>>,
    pub timeslot: TimeslotSession<A, C>,
    pub gatt: Rc<RefCell<GattServer<L>>>,
}

impl<M, S, R, A, C, L, const HIGH_CAP: usize, const LOW_CAP: usize, const STATS_HIST: usize>
    Node<M, S, R, A, C, L, HIGH_CAP, LOW_CAP, STATS_HIST>
where
    M: MonotonicSource,
    S: flare_sched::SleepSemaphore,
    R: RadioBackend + 'static,
    A: ArbiterApi,
    C: SessionCallbacks,
    L: AttLinkLayer + 'static,
{
    pub fn new(clock: M, semaphore: S, radio_backend: R, radio_config: EsbConfig, arbiter: A, session_callbacks: C, link: L) -> Self {
        Self {
            scheduler: Scheduler::new(clock, semaphore),
            esb: Rc::new(RefCell::new(Esb::new(radio_backend, radio_config))),
            timeslot: TimeslotSession::new(arbiter, session_callbacks),
            gatt: Rc::new(RefCell::new(GattServer::new(link))),
        }
    }

    // --- Scheduler API -------------------------------------------------

    pub fn queue_work(&mut self, label: Label, callback: WorkCallback) -> Result<(), flare_sched::WorkItem> {
        self.scheduler.queue_work(label, callback)
    }

    pub fn queue_low_priority_work(&mut self, label: Label, callback: WorkCallback) -> bool {
        self.scheduler.queue_low_priority_work(label, callback)
    }

    pub fn clear_low_priority_by_label(&mut self, label: Label) -> u32 {
        self.scheduler.clear_low_priority_by_label(label)
    }

    pub fn register_timer(&mut self, spec: TimerSpec, callback: flare_sched::TimerCallback) -> TimerId {
        self.scheduler.register_timer(spec, callback)
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.scheduler.cancel_timer(id)
    }

    pub fn run_forever(&mut self) {
        self.scheduler.run_forever();
    }

    pub fn run_for(&mut self, duration_us: u64) {
        self.scheduler.run_for(duration_us)
    }

    pub fn stats(&self) -> flare_sched::Stats {
        self.scheduler.stats()
    }

    // --- Timeslot API ----------------------------------------------------

    pub fn open_session(&mut self) {
        self.timeslot.open();
    }

    pub fn close_session(&mut self) {
        self.timeslot.close();
    }

    pub fn request_timeslots(&mut self, period_us: u32, duration_us: u32, high_priority: bool) {
        self.timeslot.request_timeslots(period_us, duration_us, high_priority);
    }

    pub fn cancel_session(&mut self) {
        self.timeslot.cancel();
    }

    pub fn end_this_timeslot(&mut self) -> Result<(), ()> {
        self.timeslot.end_this_timeslot()
    }

    pub fn session_state(&self) -> SessionState {
        self.timeslot.state()
    }

    // --- ESB send API ------------------------------------------------------

    pub fn start_radio(&mut self) {
        self.esb.borrow_mut().start();
    }

    pub fn stop_radio(&mut self) {
        self.esb.borrow_mut().stop();
    }

    pub fn send(&mut self, frame: &Frame) -> TxStatus {
        self.esb.borrow_mut().send(frame)
    }

    pub fn get_message_to_send(&self) -> Frame {
        self.esb.borrow().get_message_to_send()
    }

    pub fn set_callback_on_rx(&mut self, callback: alloc::boxed::Box<dyn FnMut(Frame)>) {
        self.esb.borrow_mut().set_callback_on_rx(callback);
    }

    /// Drains a received frame from the radio backend, if any, and queues
    /// delivery to the registered on-rx callback as scheduler work.
    pub fn poll_radio(&mut self) {
        Esb::poll_and_dispatch(&self.esb, &mut self.scheduler);
    }

    pub fn set_tx_power_pct(&mut self, pct: u8) {
        self.esb.borrow_mut().set_tx_power_pct(pct);
    }

    // --- GATT API ------------------------------------------------------

    pub fn init_gatt(&mut self, device_name: &[u8], services: &[Service], database_hash: [u8; 16]) {
        self.gatt.borrow_mut().init(device_name, services, database_hash);
    }

    pub fn gatt_on_ready(&mut self) {
        self.gatt.borrow_mut().on_ready();
    }

    pub fn set_callback_on_read(&mut self, id: CharacteristicId, callback: flare_gatt::ReadCallback) {
        self.gatt.borrow_mut().set_callback_on_read(id, callback);
    }

    pub fn set_callback_on_write(&mut self, id: CharacteristicId, callback: flare_gatt::WriteCallback) {
        self.gatt.borrow_mut().set_callback_on_write(id, callback);
    }

    pub fn set_callback_on_subscribe(&mut self, id: CharacteristicId, callback: flare_gatt::SubscribeCallback) {
        self.gatt.borrow_mut().set_callback_on_subscribe(id, callback);
    }

    pub fn trigger_notify(&mut self, conn: ConnHandle, id: CharacteristicId) {
        GattServer::trigger_notify(&self.gatt, conn, id);
    }

    pub fn att_read_prepare(&mut self, conn: ConnHandle, handle: u16) -> ReadOutcome {
        GattServer::att_read_prepare(&self.gatt, &mut self.scheduler, conn, handle)
    }

    pub fn att_write(
        &mut self,
        conn: ConnHandle,
        handle: u16,
        mode: TransactionMode,
        data: &[u8],
    ) -> Result<(), WriteError> {
        GattServer::att_write(&self.gatt, &mut self.scheduler, conn, handle, mode, data)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use flare_gatt::database::{CharacteristicSpec, Service};
    use flare_gatt::uuid::Uuid;
    use flare_radio::addressing::RadioAddress;
    use flare_radio::esb::{Frame, Mode, Phy};
    use flare_radio::timeslot::{Action, Priority, SessionId, Signal, SlotRequest};
    use flare_sched::semaphore::StdSemaphore;
    use flare_time::StdMonotonicSource;

    struct NullRadio;
    impl RadioBackend for NullRadio {
        fn set_addr_rx(&mut self, _addr: RadioAddress) {}
        fn set_addr_tx(&mut self, _addr: RadioAddress) {}
        fn set_channel(&mut self, _channel: u8) {}
        fn set_phy(&mut self, _phy: Phy) {}
        fn set_tx_power(&mut self, _dbm: i8) {}
        fn start_rx(&mut self) {}
        fn start_tx(&mut self, _frame: &Frame) {}
        fn stop(&mut self) {}
        fn wait_tx_complete(&mut self, _timeout_us: u64) -> Option<bool> {
            Some(true)
        }
        fn take_received(&mut self) -> Option<Frame> {
            None
        }
    }

    struct QueueRadio {
        rx_queue: alloc::collections::VecDeque<Frame>,
    }
    impl RadioBackend for QueueRadio {
        fn set_addr_rx(&mut self, _addr: RadioAddress) {}
        fn set_addr_tx(&mut self, _addr: RadioAddress) {}
        fn set_channel(&mut self, _channel: u8) {}
        fn set_phy(&mut self, _phy: Phy) {}
        fn set_tx_power(&mut self, _dbm: i8) {}
        fn start_rx(&mut self) {}
        fn start_tx(&mut self, _frame: &Frame) {}
        fn stop(&mut self) {}
        fn wait_tx_complete(&mut self, _timeout_us: u64) -> Option<bool> {
            Some(true)
        }
        fn take_received(&mut self) -> Option<Frame> {
            self.rx_queue.pop_front()
        }
    }

    struct NullArbiter;
    impl ArbiterApi for NullArbiter {
        fn open_session(&mut self) -> SessionId {
            SessionId(1)
        }
        fn close_session(&mut self, _id: SessionId) {}
        fn request_timeslot(&mut self, _id: SessionId, _request: SlotRequest) {}
        fn software_trigger_extension_decision(&mut self, _id: SessionId) {}
    }

    struct NullSessionCallbacks;
    impl SessionCallbacks for NullSessionCallbacks {
        fn on_start(&mut self) {}
        fn on_end(&mut self) {}
    }

    struct NullLink;
    impl AttLinkLayer for NullLink {
        fn init_attribute_server(&mut self, _db_bytes: &[u8]) {}
        fn set_attribute_server_db(&mut self, _db_bytes: &[u8]) {}
        fn response_ready(&mut self, _conn: ConnHandle) {}
        fn request_can_send_now(&mut self, _conn: ConnHandle) {}
        fn notify(&mut self, _conn: ConnHandle, _handle: u16, _bytes: &[u8]) {}
    }

    type TestNode = Node<StdMonotonicSource, StdSemaphore, NullRadio, NullArbiter, NullSessionCallbacks, NullLink, 8, 8, 4>;

    fn new_node() -> TestNode {
        Node::new(
            StdMonotonicSource::new(),
            StdSemaphore::new(),
            NullRadio,
            EsbConfig {
                mode: Mode::Rx,
                addr_rx: RadioAddress(1),
                addr_tx: RadioAddress(2),
                channel: 10,
                phy: Phy::Nrf1M,
                tx_power_pct: 50,
            },
            NullArbiter,
            NullSessionCallbacks,
            NullLink,
        )
    }

    #[test]
    fn node_wires_timeslot_requests_through_to_the_arbiter() {
        let mut node = new_node();
        node.open_session();
        node.request_timeslots(10_000, 2_000, false);
        assert_eq!(node.session_state(), SessionState::PendingStart);

        let action = node.timeslot.on_signal(Signal::Start);
        assert!(matches!(action, Action::None));
        assert_eq!(node.session_state(), SessionState::InTimeslot);
    }

    #[test]
    fn node_compiles_a_gatt_database_and_dispatches_a_read_through_the_scheduler() {
        let mut node = new_node();
        let spec = CharacteristicSpec::new(Uuid::from_u16(0xAAAA), "READ", alloc::vec![9]);
        let service = Service::new(Uuid::from_u16(0xAAAA), alloc::vec![spec]);
        node.init_gatt(b"node", &[service], [0u8; 16]);

        let id = {
            let gatt = node.gatt.borrow();
            gatt.database().unwrap().characteristic(CharacteristicId(0)).unwrap().id
        };
        node.set_callback_on_read(id, alloc::boxed::Box::new(|out| out.push(0xAB)));
        let value_handle = {
            let gatt = node.gatt.borrow();
            gatt.database().unwrap().characteristic(id).unwrap().value_handle
        };

        let outcome = node.att_read_prepare(ConnHandle(1), value_handle);
        assert!(matches!(outcome, ReadOutcome::Pending));

        node.scheduler.tick();

        let chunk = node.gatt.borrow_mut().att_read_deliver(value_handle, 0, 20);
        assert_eq!(chunk, alloc::vec![0xAB]);
    }

    #[test]
    fn node_forwards_esb_sends_to_the_backend() {
        let mut node = new_node();
        node.start_radio();
        let frame = Frame::from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(node.send(&frame), TxStatus::Success);
    }

    #[test]
    fn node_delivers_received_frames_to_the_on_rx_callback_via_the_scheduler() {
        type QueueNode = Node<StdMonotonicSource, StdSemaphore, QueueRadio, NullArbiter, NullSessionCallbacks, NullLink, 8, 8, 4>;

        let mut rx_queue = alloc::collections::VecDeque::new();
        rx_queue.push_back(Frame::from_slice(&[4, 5]).unwrap());
        let mut node: QueueNode = Node::new(
            StdMonotonicSource::new(),
            StdSemaphore::new(),
            QueueRadio { rx_queue },
            EsbConfig {
                mode: Mode::Rx,
                addr_rx: RadioAddress(1),
                addr_tx: RadioAddress(2),
                channel: 10,
                phy: Phy::Nrf1M,
                tx_power_pct: 50,
            },
            NullArbiter,
            NullSessionCallbacks,
            NullLink,
        );
        node.start_radio();

        let received: Rc<RefCell<Option<Frame>>> = Rc::new(RefCell::new(None));
        let received2 = received.clone();
        node.set_callback_on_rx(alloc::boxed::Box::new(move |frame: Frame| {
            *received2.borrow_mut() = Some(frame);
        }));

        node.poll_radio();
        assert!(received.borrow().is_none(), "delivery must wait for the scheduler to run");

        node.scheduler.tick();
        assert_eq!(received.borrow().as_ref().unwrap().as_slice(), &[4, 5]);
    }
}

//! The timeslot session state machine: opens a session with a proprietary
//! radio arbiter, requests periodic windows, and bounces IRQ-context signals
//! through a small FIFO so client callbacks never run at interrupt priority.

use heapless::Deque;

use crate::constants::{EARLY_EXPIRE_US, IRQ_FIFO_CAPACITY, PROCESSING_LEAD_US};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

/// Signals the arbiter's high-priority callback delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Radio,
    Start,
    Timer0Chan0,
    Timer0Chan1,
    ExtendSucceeded,
    ExtendFailed,
    Blocked,
    Cancelled,
    SessionIdle,
    SessionClosed,
    Overstayed,
    InvalidReturn,
}

/// How long and how urgently the next slot is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRequest {
    pub priority: Priority,
    pub length_us: u32,
    /// Either a timeout (earliest request) or a fixed distance from the
    /// previous slot (normal periodic request), in microseconds.
    pub timeout_or_distance_us: u32,
    pub earliest: bool,
}

/// What the client's reply to a [`Signal`] asks the arbiter to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Request(SlotRequest),
    Extend(u32),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Idle,
    PendingStart,
    InTimeslot,
    PendingExtension,
}

/// Events queued for the software-IRQ bounce, consumed by
/// [`TimeslotSession::drain_pending`] to call client callbacks outside IRQ
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Start,
    End,
    NoMoreComing,
    RadioAvailable,
    Assert,
}

/// The client-supplied hooks, invoked only from [`TimeslotSession::drain_pending`].
pub trait SessionCallbacks {
    fn on_start(&mut self);
    fn on_end(&mut self);
    fn on_no_more_coming(&mut self) {}
    fn on_radio_available(&mut self) {}
    fn on_assert(&mut self) {}
}

/// Arbiter operations a session drives. A real implementation forwards these
/// to the proprietary radio-scheduling firmware; tests use a recording
/// double.
pub trait ArbiterApi {
    fn open_session(&mut self) -> SessionId;
    fn close_session(&mut self, id: SessionId);
    fn request_timeslot(&mut self, id: SessionId, request: SlotRequest);
    fn software_trigger_extension_decision(&mut self, id: SessionId);
}

/// Per-subsystem handle to the radio arbiter, implementing the session state
/// machine from opening through periodic renewal.
pub struct TimeslotSession<A: ArbiterApi, C: SessionCallbacks> {
    arbiter: A,
    callbacks: C,
    id: Option<SessionId>,
    state: SessionState,
    period_us: u32,
    duration_us: u32,
    priority: Priority,
    extensions_enabled: bool,
    wants_next_slot: bool,
    end_requested: bool,
    pending: Deque<ClientEvent, IRQ_FIFO_CAPACITY>,
}

impl<A: ArbiterApi, C: SessionCallbacks> TimeslotSession<A, C> {
    pub fn new(arbiter: A, callbacks: C) -> Self {
        Self {
            arbiter,
            callbacks,
            id: None,
            state: SessionState::None,
            period_us: 0,
            duration_us: 0,
            priority: Priority::Normal,
            extensions_enabled: false,
            wants_next_slot: false,
            end_requested: false,
            pending: Deque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn enable_extensions(&mut self) {
        self.extensions_enabled = true;
    }

    pub fn disable_extensions(&mut self) {
        self.extensions_enabled = false;
    }

    pub fn open(&mut self) {
        if self.state == SessionState::None {
            self.id = Some(self.arbiter.open_session());
            self.state = SessionState::Idle;
        }
    }

    pub fn close(&mut self) {
        if let Some(id) = self.id.take() {
            self.arbiter.close_session(id);
        }
        self.state = SessionState::None;
        self.pending.clear();
    }

    /// Requests a recurring series of timeslots. The first request is always
    /// "earliest"; subsequent ones are issued automatically as each slot
    /// ends.
    pub fn request_timeslots(&mut self, period_us: u32, duration_us: u32, high_priority: bool) {
        self.period_us = period_us;
        self.duration_us = duration_us;
        self.priority = if high_priority { Priority::High } else { Priority::Normal };
        self.wants_next_slot = true;
        if self.state == SessionState::Idle {
            self.request_earliest();
        }
    }

    pub fn cancel(&mut self) {
        self.wants_next_slot = false;
    }

    /// Requests that the current (or about-to-start) slot end early.
    /// Debounced: a second call while one is already in flight is a no-op.
    pub fn end_this_timeslot(&mut self) -> Result<(), ()> {
        if self.end_requested {
            return Ok(());
        }
        match self.state {
            SessionState::Idle | SessionState::None => Err(()),
            SessionState::PendingStart => {
                self.end_requested = true;
                Ok(())
            }
            SessionState::InTimeslot => {
                self.end_requested = true;
                if let Some(id) = self.id {
                    self.arbiter.software_trigger_extension_decision(id);
                }
                Ok(())
            }
            SessionState::PendingExtension => {
                self.end_requested = true;
                Ok(())
            }
        }
    }

    fn request_earliest(&mut self) {
        self.state = SessionState::PendingStart;
        if let Some(id) = self.id {
            self.arbiter.request_timeslot(
                id,
                SlotRequest {
                    priority: self.priority,
                    length_us: self.duration_us,
                    timeout_or_distance_us: self.period_us,
                    earliest: true,
                },
            );
        }
    }

    fn request_next(&mut self) {
        self.state = SessionState::PendingStart;
        if let Some(id) = self.id {
            self.arbiter.request_timeslot(
                id,
                SlotRequest {
                    priority: self.priority,
                    length_us: self.duration_us,
                    timeout_or_distance_us: self.period_us,
                    earliest: false,
                },
            );
        }
    }

    fn push_event(&mut self, event: ClientEvent) {
        if self.pending.push_back(event).is_err() {
            self.pending.pop_front();
            let _ = self.pending.push_back(event);
        }
    }

    /// The two TIMER0 compare points inside a slot of `duration_us`: the
    /// extension decision point and the slot-end point.
    pub fn compare_points(duration_us: u32) -> (u32, u32) {
        let slot_end = duration_us.saturating_sub(EARLY_EXPIRE_US);
        let extension_decision = slot_end.saturating_sub(PROCESSING_LEAD_US);
        (extension_decision, slot_end)
    }

    /// Handles a signal from the arbiter's high-priority callback and
    /// returns the reply action. Must run quickly: the only side effects
    /// here are state transitions and pushing onto the bounded bounce FIFO,
    /// never client code.
    pub fn on_signal(&mut self, signal: Signal) -> Action {
        match signal {
            Signal::Start => {
                self.state = SessionState::InTimeslot;
                self.push_event(ClientEvent::Start);
                if self.end_requested {
                    if let Some(id) = self.id {
                        self.arbiter.software_trigger_extension_decision(id);
                    }
                }
                Action::None
            }
            Signal::Timer0Chan1 => {
                if self.extensions_enabled && !self.end_requested {
                    self.state = SessionState::PendingExtension;
                    Action::Extend(self.duration_us)
                } else {
                    Action::None
                }
            }
            Signal::Timer0Chan0 => {
                self.state = SessionState::Idle;
                self.push_event(ClientEvent::End);
                self.end_requested = false;
                if self.wants_next_slot {
                    self.request_next();
                    Action::Request(SlotRequest {
                        priority: self.priority,
                        length_us: self.duration_us,
                        timeout_or_distance_us: self.period_us,
                        earliest: false,
                    })
                } else {
                    self.push_event(ClientEvent::NoMoreComing);
                    Action::None
                }
            }
            Signal::ExtendSucceeded => {
                self.state = SessionState::InTimeslot;
                if self.end_requested {
                    if let Some(id) = self.id {
                        self.arbiter.software_trigger_extension_decision(id);
                    }
                }
                Action::None
            }
            Signal::ExtendFailed => {
                self.state = SessionState::InTimeslot;
                Action::None
            }
            Signal::Blocked | Signal::Cancelled => {
                self.state = SessionState::Idle;
                if self.wants_next_slot {
                    self.request_earliest();
                    Action::Request(SlotRequest {
                        priority: self.priority,
                        length_us: self.duration_us,
                        timeout_or_distance_us: self.period_us,
                        earliest: true,
                    })
                } else {
                    self.push_event(ClientEvent::NoMoreComing);
                    Action::None
                }
            }
            Signal::SessionIdle => {
                self.state = SessionState::Idle;
                self.push_event(ClientEvent::End);
                if self.wants_next_slot {
                    self.request_earliest();
                    Action::Request(SlotRequest {
                        priority: self.priority,
                        length_us: self.duration_us,
                        timeout_or_distance_us: self.period_us,
                        earliest: true,
                    })
                } else {
                    self.push_event(ClientEvent::NoMoreComing);
                    Action::None
                }
            }
            Signal::SessionClosed => {
                self.state = SessionState::None;
                Action::None
            }
            Signal::Overstayed | Signal::InvalidReturn => {
                self.push_event(ClientEvent::Assert);
                Action::End
            }
            Signal::Radio => {
                self.push_event(ClientEvent::RadioAvailable);
                Action::None
            }
        }
    }

    /// Drains the bounce FIFO and invokes client callbacks. Intended to be
    /// called from the software-IRQ handler (priority 4), never from the
    /// arbiter's own high-priority callback.
    pub fn drain_pending(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            match event {
                ClientEvent::Start => self.callbacks.on_start(),
                ClientEvent::End => self.callbacks.on_end(),
                ClientEvent::NoMoreComing => self.callbacks.on_no_more_coming(),
                ClientEvent::RadioAvailable => self.callbacks.on_radio_available(),
                ClientEvent::Assert => self.callbacks.on_assert(),
            }
        }
    }
}

//! Runtime ATT server: dispatches reads, multi-fragment writes and
//! subscription notifications against a compiled [`AttributeDatabase`].
//!
//! Generic over the link-layer stack (`L: AttLinkLayer`) the same way
//! `flare_radio::Esb` is generic over its radio backend — the dispatch logic
//! is host-testable without a real BLE stack.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use flare_sched::{Label, SchedulerHandle, WorkCallback};
use flare_util::warn;

use crate::database::{AttributeDatabase, CharacteristicId, Service};

/// Per-write capacity: a prepared write whose accumulated fragments exceed
/// this many bytes is rejected at VALIDATE.
pub const MAX_WRITE_LEN: usize = 256;

/// Identifies a connected peer. Opaque to this crate; the facade layer maps
/// it to whatever the link-layer stack uses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnHandle(pub u16);

pub type ReadCallback = Box<dyn FnMut(&mut Vec<u8>)>;
pub type WriteCallback = Box<dyn FnMut(&[u8])>;
pub type SubscribeCallback = Box<dyn FnMut(bool)>;

/// The ATT prepared-write transaction mode, as signalled by the link-layer
/// stack on each write callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Single-shot write, no prepared-write session in progress.
    None,
    /// Append this fragment to the in-progress prepared write.
    Active,
    /// Report whether the accumulated fragments are still within capacity.
    Validate,
    /// Commit the accumulated fragments.
    Execute,
    /// Discard the most recent fragment only.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The write (or accumulated prepared write) exceeds [`MAX_WRITE_LEN`].
    Overflow,
}

/// What the caller should do after requesting a read.
pub enum ReadOutcome {
    /// A CCC handle: the subscription bit, ready to send immediately.
    Immediate(Vec<u8>),
    /// A value handle: the on-read callback has been queued on the
    /// scheduler; wait for [`GattServer::att_read_deliver`] to become ready.
    Pending,
    /// No characteristic owns this handle.
    NotFound,
}

/// The register-level BLE stack operations the server drives.
pub trait AttLinkLayer {
    fn init_attribute_server(&mut self, db_bytes: &[u8]);
    fn set_attribute_server_db(&mut self, db_bytes: &[u8]);
    fn response_ready(&mut self, conn: ConnHandle);
    fn request_can_send_now(&mut self, conn: ConnHandle);
    fn notify(&mut self, conn: ConnHandle, handle: u16, bytes: &[u8]);
}

#[derive(Debug, Default)]
struct ReadState {
    ready_to_send: bool,
    conn: ConnHandle,
    handle: u16,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct WriteState {
    handle: u16,
    bytes: Vec<u8>,
    overflow: bool,
    bytes_in_this_fragment: usize,
}

#[derive(Default)]
struct CharacteristicHandlers {
    on_read: Option<ReadCallback>,
    on_write: Option<WriteCallback>,
    on_subscribe: Option<SubscribeCallback>,
    subscribed: bool,
}

/// The runtime GATT attribute server: owns the compiled database, the
/// per-characteristic handler slots, and the in-flight read/write
/// transaction state.
pub struct GattServer<L: AttLinkLayer> {
    link: L,
    db: Option<AttributeDatabase>,
    handlers: BTreeMap<u16, CharacteristicHandlers>,
    read_state: ReadState,
    write_state: WriteState,
    pending_notify: Option<(ConnHandle, CharacteristicId)>,
}

impl<L: AttLinkLayer + 'static> GattServer<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            db: None,
            handlers: BTreeMap::new(),
            read_state: ReadState::default(),
            write_state: WriteState::default(),
            pending_notify: None,
        }
    }

    /// Compiles `services` into a fresh database. Legal to call more than
    /// once: handle stability across re-inits is not guaranteed, so existing
    /// callback registrations are dropped along with the old handle space.
    pub fn init(&mut self, device_name: &[u8], services: &[Service], database_hash: [u8; 16]) {
        let db = AttributeDatabase::compile(device_name, services, database_hash);
        self.handlers.clear();
        self.db = Some(db);
    }

    /// Called once the link stack is ready to serve the compiled database.
    pub fn on_ready(&mut self) {
        if let Some(db) = &self.db {
            self.link.init_attribute_server(db.bytes());
        }
    }

    /// Re-applies the currently compiled database to the link stack after a
    /// re-init.
    pub fn push_db_to_link(&mut self) {
        if let Some(db) = &self.db {
            self.link.set_attribute_server_db(db.bytes());
        }
    }

    pub fn database(&self) -> Option<&AttributeDatabase> {
        self.db.as_ref()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn set_callback_on_read(&mut self, id: CharacteristicId, callback: ReadCallback) {
        self.handlers.entry(id.0).or_default().on_read = Some(callback);
    }

    pub fn set_callback_on_write(&mut self, id: CharacteristicId, callback: WriteCallback) {
        self.handlers.entry(id.0).or_default().on_write = Some(callback);
    }

    pub fn set_callback_on_subscribe(&mut self, id: CharacteristicId, callback: SubscribeCallback) {
        self.handlers.entry(id.0).or_default().on_subscribe = Some(callback);
    }

    pub fn is_subscribed(&self, id: CharacteristicId) -> bool {
        self.handlers.get(&id.0).map(|h| h.subscribed).unwrap_or(false)
    }

    fn run_read_callback(&mut self, id: CharacteristicId, value_handle: u16, conn: ConnHandle) {
        let mut bytes = Vec::new();
        if let Some(handlers) = self.handlers.get_mut(&id.0) {
            if let Some(cb) = handlers.on_read.as_mut() {
                cb(&mut bytes);
            }
        }
        self.read_state = ReadState {
            ready_to_send: true,
            conn,
            handle: value_handle,
            bytes,
        };
        self.link.response_ready(conn);
    }

    fn run_write_callback(&mut self, handle: u16, bytes: &[u8]) {
        let id = match self.db.as_ref().and_then(|db| db.characteristic_for_value_handle(handle)) {
            Some(compiled) => compiled.id,
            None => return,
        };
        if let Some(handlers) = self.handlers.get_mut(&id.0) {
            if let Some(cb) = handlers.on_write.as_mut() {
                cb(bytes);
            }
        }
    }

    fn run_subscribe_callback(&mut self, id: CharacteristicId, enabled: bool) {
        if let Some(handlers) = self.handlers.get_mut(&id.0) {
            handlers.subscribed = enabled;
            if let Some(cb) = handlers.on_subscribe.as_mut() {
                cb(enabled);
            }
        }
    }

    /// "Deliver chunk" half of the read path: copies up to `buf_size` bytes
    /// starting at `offset` out of the pending response. Clears the pending
    /// state once the final chunk has been handed back.
    pub fn att_read_deliver(&mut self, handle: u16, offset: usize, buf_size: usize) -> Vec<u8> {
        if !self.read_state.ready_to_send || self.read_state.handle != handle {
            return Vec::new();
        }
        let bytes = &self.read_state.bytes;
        if offset >= bytes.len() {
            self.read_state.ready_to_send = false;
            return Vec::new();
        }
        let end = (offset + buf_size).min(bytes.len());
        let chunk = bytes[offset..end].to_vec();
        if end >= bytes.len() {
            self.read_state.ready_to_send = false;
        }
        chunk
    }

    fn queue_commit(this: &Rc<RefCell<Self>>, scheduler: &mut dyn SchedulerHandle, handle: u16, bytes: Vec<u8>) {
        let this = this.clone();
        let cb: WorkCallback = Box::new(move |_sched: &mut dyn SchedulerHandle| {
            this.borrow_mut().run_write_callback(handle, &bytes);
        });
        let _ = scheduler.queue_work(Label::from("gatt-write-commit"), cb);
    }

    /// "Prepare read" half of the read path.
    pub fn att_read_prepare(
        this: &Rc<RefCell<Self>>,
        scheduler: &mut dyn SchedulerHandle,
        conn: ConnHandle,
        handle: u16,
    ) -> ReadOutcome {
        let server = this.borrow();
        let db = match server.db.as_ref() {
            Some(db) => db,
            None => {
                warn!("ATT read before a database was compiled");
                return ReadOutcome::NotFound;
            }
        };
        if let Some(compiled) = db.characteristic_for_ccc_handle(handle) {
            let subscribed = server.is_subscribed(compiled.id);
            return ReadOutcome::Immediate(alloc::vec![subscribed as u8, 0]);
        }
        let compiled = match db.characteristic_for_value_handle(handle) {
            Some(compiled) => *compiled,
            None => {
                warn!("ATT read for unknown handle {}", handle);
                return ReadOutcome::NotFound;
            }
        };
        drop(server);

        let cloned = this.clone();
        let cb: WorkCallback = Box::new(move |_sched: &mut dyn SchedulerHandle| {
            cloned.borrow_mut().run_read_callback(compiled.id, compiled.value_handle, conn);
        });
        let _ = scheduler.queue_work(Label::from("gatt-read"), cb);
        ReadOutcome::Pending
    }

    /// Handles one ATT write callback invocation, including CCC interception
    /// and the NONE/ACTIVE/VALIDATE/EXECUTE/CANCEL transaction table.
    pub fn att_write(
        this: &Rc<RefCell<Self>>,
        scheduler: &mut dyn SchedulerHandle,
        conn: ConnHandle,
        handle: u16,
        mode: TransactionMode,
        data: &[u8],
    ) -> Result<(), WriteError> {
        let _ = conn;
        let mut server = this.borrow_mut();

        if let Some(compiled) = server.db.as_ref().and_then(|db| db.characteristic_for_ccc_handle(handle)).copied() {
            let enabled = data
                .get(0..2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]) & 0x0001 != 0)
                .unwrap_or(false);
            drop(server);
            let cloned = this.clone();
            let cb: WorkCallback = Box::new(move |_sched: &mut dyn SchedulerHandle| {
                cloned.borrow_mut().run_subscribe_callback(compiled.id, enabled);
            });
            let _ = scheduler.queue_work(Label::from("gatt-subscribe"), cb);
            return Ok(());
        }

        match mode {
            TransactionMode::None => {
                if data.len() > MAX_WRITE_LEN {
                    return Err(WriteError::Overflow);
                }
                let bytes = data.to_vec();
                drop(server);
                Self::queue_commit(this, scheduler, handle, bytes);
                Ok(())
            }
            TransactionMode::Active => {
                server.write_state.handle = handle;
                if server.write_state.overflow {
                    server.write_state.bytes_in_this_fragment = 0;
                    return Ok(());
                }
                let new_len = server.write_state.bytes.len() + data.len();
                if new_len > MAX_WRITE_LEN {
                    server.write_state.overflow = true;
                    server.write_state.bytes_in_this_fragment = 0;
                    return Err(WriteError::Overflow);
                }
                server.write_state.bytes.extend_from_slice(data);
                server.write_state.bytes_in_this_fragment = data.len();
                Ok(())
            }
            TransactionMode::Validate => {
                if server.write_state.overflow {
                    Err(WriteError::Overflow)
                } else {
                    Ok(())
                }
            }
            TransactionMode::Execute => {
                let overflow = server.write_state.overflow;
                let commit_handle = server.write_state.handle;
                let bytes = core::mem::take(&mut server.write_state.bytes);
                server.write_state = WriteState::default();
                drop(server);
                if overflow {
                    return Err(WriteError::Overflow);
                }
                Self::queue_commit(this, scheduler, commit_handle, bytes);
                Ok(())
            }
            TransactionMode::Cancel => {
                let keep = server
                    .write_state
                    .bytes
                    .len()
                    .saturating_sub(server.write_state.bytes_in_this_fragment);
                server.write_state.bytes.truncate(keep);
                server.write_state.bytes_in_this_fragment = 0;
                Ok(())
            }
        }
    }

    /// Starts a notification: stores the pending handle and asks the link
    /// layer for a "can send now" event.
    pub fn trigger_notify(this: &Rc<RefCell<Self>>, conn: ConnHandle, id: CharacteristicId) {
        let mut server = this.borrow_mut();
        server.pending_notify = Some((conn, id));
        server.link.request_can_send_now(conn);
    }

    /// Completes a pending notification once the link layer signals it can
    /// send: collects bytes via the on-read callback and notifies, but only
    /// if the peer is still subscribed (the CCC write may have been
    /// reverted, or never happened at all, since `trigger_notify` was
    /// called).
    pub fn on_can_send_now(&mut self, conn: ConnHandle) {
        let (pending_conn, id) = match self.pending_notify.take() {
            Some(pending) => pending,
            None => return,
        };
        if pending_conn != conn {
            self.pending_notify = Some((pending_conn, id));
            return;
        }
        if !self.is_subscribed(id) {
            return;
        }
        let value_handle = match self.db.as_ref().and_then(|db| db.characteristic(id)) {
            Some(compiled) => compiled.value_handle,
            None => return,
        };
        let mut bytes = Vec::new();
        if let Some(handlers) = self.handlers.get_mut(&id.0) {
            if let Some(cb) = handlers.on_read.as_mut() {
                cb(&mut bytes);
            }
        }
        self.link.notify(conn, value_handle, &bytes);
    }
}

//! Declarative service/characteristic model and the compiler that turns it
//! into the byte-exact attribute database the link-layer stack expects.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::properties::{att_flags, flags, parse_properties, write_permissions_and_key_size_flags_from_properties};
use crate::uuid::Uuid;

const UUID_PRIMARY_SERVICE: Uuid = Uuid::from_u16(0x2800);
const UUID_CHARACTERISTIC: Uuid = Uuid::from_u16(0x2803);
const UUID_CCC: Uuid = Uuid::from_u16(0x2902);
const UUID_RELIABLE_WRITE: Uuid = Uuid::from_u16(0x2900);
const UUID_GENERIC_ACCESS: Uuid = Uuid::from_u16(0x1800);
const UUID_DEVICE_NAME: Uuid = Uuid::from_u16(0x2A00);
const UUID_GENERIC_ATTRIBUTE: Uuid = Uuid::from_u16(0x1801);
const UUID_DATABASE_HASH: Uuid = Uuid::from_u16(0x2B2A);

/// A characteristic as declared by the application, before compilation.
#[derive(Debug, Clone)]
pub struct CharacteristicSpec {
    pub uuid: Uuid,
    /// Pipe-separated property tokens, e.g. `"READ|NOTIFY|DYNAMIC"`.
    pub properties: &'static str,
    pub initial_value: Vec<u8>,
}

impl CharacteristicSpec {
    pub fn new(uuid: Uuid, properties: &'static str, initial_value: Vec<u8>) -> Self {
        Self {
            uuid,
            properties,
            initial_value,
        }
    }
}

/// A service as declared by the application: a UUID and its characteristics,
/// in declaration order.
#[derive(Debug, Clone)]
pub struct Service {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicSpec>,
}

impl Service {
    pub fn new(uuid: Uuid, characteristics: Vec<CharacteristicSpec>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}

/// Identifies a user-declared characteristic within a compiled database, in
/// declaration order across all services (the two always-emitted built-in
/// services are not addressable this way).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CharacteristicId(pub u16);

/// A compiled characteristic's handles and resolved flags, as recorded by
/// the compiler for later dispatch.
#[derive(Debug, Clone, Copy)]
pub struct CompiledCharacteristic {
    pub id: CharacteristicId,
    pub uuid: Uuid,
    pub properties: u32,
    pub value_handle: u16,
    pub ccc_handle: Option<u16>,
}

fn append_u16_le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

struct Compiler {
    bytes: Vec<u8>,
    next_handle: u16,
}

impl Compiler {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next_handle: 1,
        }
    }

    /// Appends one row and returns the handle assigned to it.
    fn add_entry(&mut self, flags: u32, uuid: Uuid, value: &[u8]) -> u16 {
        let uuid_bytes = uuid.reversed_bytes();
        let size = 2u16 + 2 + 2 + uuid_bytes.len() as u16 + value.len() as u16;

        append_u16_le(&mut self.bytes, size);
        append_u16_le(&mut self.bytes, flags as u16);

        let handle = self.next_handle;
        self.next_handle += 1;
        append_u16_le(&mut self.bytes, handle);

        self.bytes.extend_from_slice(&uuid_bytes);
        self.bytes.extend_from_slice(value);

        handle
    }

    fn add_primary_service(&mut self, uuid: Uuid) -> u16 {
        self.add_entry(flags::READ, UUID_PRIMARY_SERVICE, &uuid.reversed_bytes())
    }

    /// Adds a full characteristic (declaration + value + optional CCC and
    /// Reliable Write rows) and returns the compiled record.
    fn add_characteristic(&mut self, id: CharacteristicId, spec: &CharacteristicSpec) -> CompiledCharacteristic {
        let read_only_anybody = flags::READ;

        let mut properties = parse_properties(spec.properties);
        if properties & flags::RELIABLE_WRITE != 0 {
            properties |= flags::EXTENDED_PROPERTIES;
        }

        // Characteristic declaration row: points at the handle of the value
        // row that immediately follows it.
        let next_handle = self.next_handle + 1;
        let ctc_properties = (properties & 0xff) as u8;
        let mut ctc_value = Vec::new();
        ctc_value.push(ctc_properties);
        append_u16_le(&mut ctc_value, next_handle);
        ctc_value.extend_from_slice(&spec.uuid.reversed_bytes());
        self.add_entry(read_only_anybody, UUID_CHARACTERISTIC, &ctc_value);

        // Characteristic value row.
        let mut value_flags = att_flags(properties);
        if spec.uuid.bit_count() == 128 {
            value_flags |= flags::LONG_UUID;
        }
        let value_handle = self.add_entry(value_flags, spec.uuid, &spec.initial_value);

        // Optional CCC row.
        let mut ccc_handle = None;
        if properties & (flags::NOTIFY | flags::INDICATE) != 0 {
            let mut ccc_flags = write_permissions_and_key_size_flags_from_properties(properties);
            ccc_flags |= flags::READ | flags::WRITE | flags::WRITE_WITHOUT_RESPONSE | flags::DYNAMIC;
            ccc_handle = Some(self.add_entry(ccc_flags, UUID_CCC, &0u16.to_le_bytes()));
        }

        // Optional Reliable Write row.
        if properties & flags::RELIABLE_WRITE != 0 {
            self.add_entry(read_only_anybody, UUID_RELIABLE_WRITE, &1u16.to_le_bytes());
        }

        CompiledCharacteristic {
            id,
            uuid: spec.uuid,
            properties,
            value_handle,
            ccc_handle,
        }
    }
}

/// A compiled attribute database: the wire-format byte blob plus the handle
/// maps the server needs to dispatch reads, writes and notifications.
#[derive(Debug, Clone)]
pub struct AttributeDatabase {
    bytes: Vec<u8>,
    value_handles: BTreeMap<u16, CharacteristicId>,
    ccc_handles: BTreeMap<u16, CharacteristicId>,
    characteristics: Vec<CompiledCharacteristic>,
}

impl AttributeDatabase {
    /// Compiles `services` into a database, prefixed by the always-emitted
    /// Generic Access and Generic Attribute services.
    ///
    /// `database_hash` should come from a hardware entropy source; its only
    /// contract is to stay stable for the lifetime of one compiled database.
    pub fn compile(device_name: &[u8], services: &[Service], database_hash: [u8; 16]) -> Self {
        let mut compiler = Compiler::new();
        let mut value_handles = BTreeMap::new();
        let mut ccc_handles = BTreeMap::new();
        let mut characteristics = Vec::new();
        let mut next_id = 0u16;

        compiler.add_primary_service(UUID_GENERIC_ACCESS);
        compiler.add_characteristic(
            CharacteristicId(u16::MAX),
            &CharacteristicSpec::new(UUID_DEVICE_NAME, "READ", device_name.to_vec()),
        );

        compiler.add_primary_service(UUID_GENERIC_ATTRIBUTE);
        compiler.add_characteristic(
            CharacteristicId(u16::MAX),
            &CharacteristicSpec::new(UUID_DATABASE_HASH, "READ", database_hash.to_vec()),
        );

        for service in services {
            compiler.add_primary_service(service.uuid);
            for spec in &service.characteristics {
                let id = CharacteristicId(next_id);
                next_id += 1;
                let compiled = compiler.add_characteristic(id, spec);
                value_handles.insert(compiled.value_handle, id);
                if let Some(ccc_handle) = compiled.ccc_handle {
                    ccc_handles.insert(ccc_handle, id);
                }
                characteristics.push(compiled);
            }
        }

        let mut bytes = Vec::with_capacity(compiler.bytes.len() + 3);
        bytes.push(1u8); // database format version
        bytes.extend_from_slice(&compiler.bytes);
        bytes.push(0);
        bytes.push(0);

        Self {
            bytes,
            value_handles,
            ccc_handles,
            characteristics,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn characteristic_for_value_handle(&self, handle: u16) -> Option<&CompiledCharacteristic> {
        self.value_handles
            .get(&handle)
            .and_then(|id| self.characteristics.get(id.0 as usize))
    }

    pub fn characteristic_for_ccc_handle(&self, handle: u16) -> Option<&CompiledCharacteristic> {
        self.ccc_handles
            .get(&handle)
            .and_then(|id| self.characteristics.get(id.0 as usize))
    }

    pub fn characteristic(&self, id: CharacteristicId) -> Option<&CompiledCharacteristic> {
        self.characteristics.get(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_one(uuid: Uuid, properties: &'static str) -> AttributeDatabase {
        let services = [Service::new(
            uuid,
            alloc::vec![CharacteristicSpec::new(uuid, properties, alloc::vec![0xAA])],
        )];
        AttributeDatabase::compile(b"node", &services, [0u8; 16])
    }

    #[test]
    fn database_begins_with_version_byte_and_ends_with_zero_terminator() {
        let db = compile_one(Uuid::from_u16(0xAAAA), "READ");
        assert_eq!(db.bytes()[0], 1);
        let len = db.bytes().len();
        assert_eq!(&db.bytes()[len - 2..], &[0, 0]);
    }

    #[test]
    fn notify_characteristic_gets_a_ccc_row_plain_one_does_not() {
        let with_notify = compile_one(Uuid::from_u16(0xAAAA), "READ|NOTIFY|DYNAMIC");
        let compiled = with_notify.characteristics[0];
        assert!(compiled.ccc_handle.is_some());

        let without_notify = compile_one(Uuid::from_u16(0xBBBB), "READ");
        let compiled = without_notify.characteristics[0];
        assert!(compiled.ccc_handle.is_none());
    }

    #[test]
    fn handles_are_contiguous_from_one() {
        let db = compile_one(Uuid::from_u16(0xAAAA), "READ|NOTIFY|DYNAMIC");
        // Generic Access service (1) + Device Name decl (2) + value (3)
        // + Generic Attribute service (4) + Database Hash decl (5) + value (6)
        // + our service (7) + our characteristic decl (8) + value (9) + ccc (10)
        let compiled = db.characteristics[0];
        assert_eq!(compiled.value_handle, 9);
        assert_eq!(compiled.ccc_handle, Some(10));
    }

    #[test]
    fn value_handle_resolves_back_to_the_declared_characteristic() {
        let db = compile_one(Uuid::from_u16(0xCCCC), "READ");
        let compiled = db.characteristics[0];
        let found = db.characteristic_for_value_handle(compiled.value_handle).unwrap();
        assert_eq!(found.uuid, Uuid::from_u16(0xCCCC));
    }

    #[test]
    fn ccc_flags_fold_in_encryption_key_size_from_value_properties() {
        let db = compile_one(Uuid::from_u16(0xDDDD), "READ|NOTIFY|DYNAMIC|ENCRYPTION_KEY_SIZE_16");
        let compiled = db.characteristics[0];
        let ccc_handle = compiled.ccc_handle.unwrap();
        let ccc = db.characteristic_for_ccc_handle(ccc_handle);
        // The CCC row itself is not tracked as a separate CompiledCharacteristic;
        // it resolves back to the owning value characteristic.
        assert_eq!(ccc.unwrap().value_handle, compiled.value_handle);
    }
}

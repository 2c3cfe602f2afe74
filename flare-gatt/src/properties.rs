//! GATT characteristic property flags and the security-derivation logic that
//! turns a property string into the flag word the attribute database stores.
//!
//! Lifted from the reference GATT compiler this firmware line has always
//! used: the flag values below are fixed by the link-layer stack's on-disk
//! database format, not something we get to choose.

use flare_util::warn;

/// GATT characteristic property and attribute-database flag bits.
pub mod flags {
    // GATT Characteristic Properties.
    pub const BROADCAST: u32 = 0x01;
    pub const READ: u32 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u32 = 0x04;
    pub const WRITE: u32 = 0x08;
    pub const NOTIFY: u32 = 0x10;
    pub const INDICATE: u32 = 0x20;
    pub const AUTHENTICATED_SIGNED_WRITE: u32 = 0x40;
    pub const EXTENDED_PROPERTIES: u32 = 0x80;

    // Custom attribute-database extensions.
    pub const DYNAMIC: u32 = 0x100;
    pub const LONG_UUID: u32 = 0x200;

    // Read permissions.
    pub const READ_PERMISSION_BIT_0: u32 = 0x400;
    pub const READ_PERMISSION_BIT_1: u32 = 0x800;

    pub const ENCRYPTION_KEY_SIZE_7: u32 = 0x6000;
    pub const ENCRYPTION_KEY_SIZE_8: u32 = 0x7000;
    pub const ENCRYPTION_KEY_SIZE_9: u32 = 0x8000;
    pub const ENCRYPTION_KEY_SIZE_10: u32 = 0x9000;
    pub const ENCRYPTION_KEY_SIZE_11: u32 = 0xa000;
    pub const ENCRYPTION_KEY_SIZE_12: u32 = 0xb000;
    pub const ENCRYPTION_KEY_SIZE_13: u32 = 0xc000;
    pub const ENCRYPTION_KEY_SIZE_14: u32 = 0xd000;
    pub const ENCRYPTION_KEY_SIZE_15: u32 = 0xe000;
    pub const ENCRYPTION_KEY_SIZE_16: u32 = 0xf000;
    pub const ENCRYPTION_KEY_SIZE_MASK: u32 = 0xf000;

    // Extended properties, used only by the attribute-database compiler.
    pub const RELIABLE_WRITE: u32 = 0x0001_0000;
    pub const AUTHENTICATION_REQUIRED: u32 = 0x0002_0000;
    pub const AUTHORIZATION_REQUIRED: u32 = 0x0004_0000;
    pub const READ_ANYBODY: u32 = 0x0008_0000;
    pub const READ_ENCRYPTED: u32 = 0x0010_0000;
    pub const READ_AUTHENTICATED: u32 = 0x0020_0000;
    pub const READ_AUTHENTICATED_SC: u32 = 0x0040_0000;
    pub const READ_AUTHORIZED: u32 = 0x0080_0000;
    pub const WRITE_ANYBODY: u32 = 0x0100_0000;
    pub const WRITE_ENCRYPTED: u32 = 0x0200_0000;
    pub const WRITE_AUTHENTICATED: u32 = 0x0400_0000;
    pub const WRITE_AUTHENTICATED_SC: u32 = 0x0800_0000;
    pub const WRITE_AUTHORIZED: u32 = 0x1000_0000;

    // Reuse the low byte for write permissions and SC requirements; these
    // only ever appear on attribute-database rows, never in a property
    // string, so the bit overlap with BROADCAST/NOTIFY/etc. is harmless.
    pub const WRITE_PERMISSION_BIT_0: u32 = 0x01;
    pub const WRITE_PERMISSION_BIT_1: u32 = 0x10;
    pub const READ_PERMISSION_SC: u32 = 0x20;
    pub const WRITE_PERMISSION_SC: u32 = 0x80;
}

fn lookup(token: &str) -> Option<u32> {
    use flags::*;
    Some(match token {
        "BROADCAST" => BROADCAST,
        "READ" => READ,
        "WRITE_WITHOUT_RESPONSE" => WRITE_WITHOUT_RESPONSE,
        "WRITE" => WRITE,
        "NOTIFY" => NOTIFY,
        "INDICATE" => INDICATE,
        "AUTHENTICATED_SIGNED_WRITE" => AUTHENTICATED_SIGNED_WRITE,
        "EXTENDED_PROPERTIES" => EXTENDED_PROPERTIES,
        "DYNAMIC" => DYNAMIC,
        "LONG_UUID" => LONG_UUID,
        "RELIABLE_WRITE" => RELIABLE_WRITE,
        "AUTHENTICATION_REQUIRED" => AUTHENTICATION_REQUIRED,
        "AUTHORIZATION_REQUIRED" => AUTHORIZATION_REQUIRED,
        "READ_ANYBODY" => READ_ANYBODY,
        "READ_ENCRYPTED" => READ_ENCRYPTED,
        "READ_AUTHENTICATED" => READ_AUTHENTICATED,
        "READ_AUTHENTICATED_SC" => READ_AUTHENTICATED_SC,
        "READ_AUTHORIZED" => READ_AUTHORIZED,
        "WRITE_ANYBODY" => WRITE_ANYBODY,
        "WRITE_ENCRYPTED" => WRITE_ENCRYPTED,
        "WRITE_AUTHENTICATED" => WRITE_AUTHENTICATED,
        "WRITE_AUTHENTICATED_SC" => WRITE_AUTHENTICATED_SC,
        "WRITE_AUTHORIZED" => WRITE_AUTHORIZED,
        "ENCRYPTION_KEY_SIZE_7" => ENCRYPTION_KEY_SIZE_7,
        "ENCRYPTION_KEY_SIZE_8" => ENCRYPTION_KEY_SIZE_8,
        "ENCRYPTION_KEY_SIZE_9" => ENCRYPTION_KEY_SIZE_9,
        "ENCRYPTION_KEY_SIZE_10" => ENCRYPTION_KEY_SIZE_10,
        "ENCRYPTION_KEY_SIZE_11" => ENCRYPTION_KEY_SIZE_11,
        "ENCRYPTION_KEY_SIZE_12" => ENCRYPTION_KEY_SIZE_12,
        "ENCRYPTION_KEY_SIZE_13" => ENCRYPTION_KEY_SIZE_13,
        "ENCRYPTION_KEY_SIZE_14" => ENCRYPTION_KEY_SIZE_14,
        "ENCRYPTION_KEY_SIZE_15" => ENCRYPTION_KEY_SIZE_15,
        "ENCRYPTION_KEY_SIZE_16" => ENCRYPTION_KEY_SIZE_16,
        _ => return None,
    })
}

/// Parses a pipe-separated property string (e.g. `"READ|NOTIFY|DYNAMIC"`)
/// into a bitmask. Unknown tokens are logged and skipped.
pub fn parse_properties(spec: &str) -> u32 {
    let mut result = 0;
    for token in spec.split('|') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match lookup(token) {
            Some(bit) => result |= bit,
            None => warn!("unsupported ATT property \"{}\"", token),
        }
    }
    result
}

/// Derives the value-row security flags (READ/WRITE permission bits, SC
/// requirements) from a raw property bitmask.
///
/// Mirrors the original GATT compiler: display-only bits (BROADCAST, NOTIFY,
/// INDICATE, EXTENDED_PROPERTIES) are dropped before deriving permissions,
/// and when no distinct READ_*/WRITE_* permission is explicitly set, a bare
/// `AUTHENTICATION_REQUIRED`/`AUTHORIZATION_REQUIRED`/encryption-key-size
/// token implies both read and write need the same protection.
pub fn att_flags(properties_in: u32) -> u32 {
    use flags::*;

    let mut properties = properties_in & 0xffff_ff4e;

    let distinct_permissions_used = properties
        & (READ_AUTHORIZED
            | READ_AUTHENTICATED_SC
            | READ_AUTHENTICATED
            | READ_ENCRYPTED
            | READ_ANYBODY
            | WRITE_AUTHORIZED
            | WRITE_AUTHENTICATED
            | WRITE_AUTHENTICATED_SC
            | WRITE_ENCRYPTED
            | WRITE_ANYBODY)
        != 0;

    let encryption_key_size_specified = properties & ENCRYPTION_KEY_SIZE_MASK != 0;

    if encryption_key_size_specified && !distinct_permissions_used {
        properties |= READ_ENCRYPTED | WRITE_ENCRYPTED;
    }
    if properties & AUTHENTICATION_REQUIRED != 0 && !distinct_permissions_used {
        properties |= READ_AUTHENTICATED | WRITE_AUTHENTICATED;
    }
    if properties & AUTHORIZATION_REQUIRED != 0 && !distinct_permissions_used {
        properties |= READ_AUTHORIZED | WRITE_AUTHORIZED;
    }

    let mut read_security_level = 0u8;
    let mut write_security_level = 0u8;
    let mut read_requires_sc = false;
    let mut write_requires_sc = false;

    if properties & READ_AUTHORIZED != 0 {
        read_security_level = 3;
    } else if properties & READ_AUTHENTICATED != 0 {
        read_security_level = 2;
    } else if properties & READ_AUTHENTICATED_SC != 0 {
        read_security_level = 2;
        read_requires_sc = true;
    } else if properties & READ_ENCRYPTED != 0 {
        read_security_level = 1;
    }

    if properties & WRITE_AUTHORIZED != 0 {
        write_security_level = 3;
    } else if properties & WRITE_AUTHENTICATED != 0 {
        write_security_level = 2;
    } else if properties & WRITE_AUTHENTICATED_SC != 0 {
        write_security_level = 2;
        write_requires_sc = true;
    } else if properties & WRITE_ENCRYPTED != 0 {
        write_security_level = 1;
    }

    if read_security_level & 2 != 0 {
        properties |= READ_PERMISSION_BIT_1;
    }
    if read_security_level & 1 != 0 {
        properties |= READ_PERMISSION_BIT_0;
    }
    if read_requires_sc {
        properties |= READ_PERMISSION_SC;
    }
    if write_security_level & 2 != 0 {
        properties |= WRITE_PERMISSION_BIT_1;
    }
    if write_security_level & 1 != 0 {
        properties |= WRITE_PERMISSION_BIT_0;
    }
    if write_requires_sc {
        properties |= WRITE_PERMISSION_SC;
    }

    properties
}

/// The write-permission and encryption-key-size bits a CCC row folds in from
/// its value characteristic's properties.
pub fn write_permissions_and_key_size_flags_from_properties(properties: u32) -> u32 {
    att_flags(properties)
        & (flags::ENCRYPTION_KEY_SIZE_MASK | flags::WRITE_PERMISSION_BIT_0 | flags::WRITE_PERMISSION_BIT_1)
}

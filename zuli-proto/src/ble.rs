//! BLE GATT constants for Zuli smartplugs
//!
//! Every command goes through a single characteristic (the "command pipe"):
//! the controller writes a request packet with response, then reads the same
//! characteristic to get the reply.

use uuid::Uuid;

/// Service UUID advertised by every Zuli smartplug
pub const ZULI_SERVICE: Uuid = Uuid::from_u128(0x04ee929b_bb13_4e77_8160_18552daf06e1);

/// Command pipe characteristic UUID (write with response, read)
pub const COMMAND_PIPE: Uuid = Uuid::from_u128(0xffffff03_bb13_4e77_8160_18552daf06e1);

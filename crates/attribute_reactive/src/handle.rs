//! Handles into a [`HandleTable`](crate::HandleTable).

use std::fmt;

/// Index of a callback layer within one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub u8);

impl LayerId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Layer every tracker reserves for effect bodies hosted on it.
pub const EFFECT_LAYER: LayerId = LayerId(0);

/// Number of layers a single tracker can address.
pub const MAX_LAYERS: usize = u8::MAX as usize + 1;

/// Reference to one bound callback.
///
/// A handle is only honoured while its serial matches the slot it points at,
/// so a handle kept after its callback was removed can never reach the
/// callback that reuses the slot. Serial `0` marks the invalid handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    layer: LayerId,
    slot: u32,
    serial: u64,
}

impl Handle {
    pub const INVALID: Handle = Handle {
        layer: LayerId(0),
        slot: 0,
        serial: 0,
    };

    pub(crate) const fn new(layer: LayerId, slot: u32, serial: u64) -> Self {
        Self {
            layer,
            slot,
            serial,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.serial != 0
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}:{}@s{})", self.layer, self.slot, self.serial)
        } else {
            f.write_str("Handle(invalid)")
        }
    }
}

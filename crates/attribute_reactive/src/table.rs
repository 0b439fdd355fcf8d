//! Layered callback storage with generation-checked handles.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::{error, trace};

use crate::handle::{Handle, LayerId, MAX_LAYERS};

pub type Callback = Rc<dyn Fn()>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("layer space exhausted: {requested} layers requested, {allocated} of 256 in use")]
pub struct LayerOverflow {
    pub requested: usize,
    pub allocated: usize,
}

/// Monotonic serial counter shared by every table of one runtime.
///
/// Serials start at 1 and skip 0 on wrap-around, which keeps `0` free for
/// [`Handle::INVALID`].
#[derive(Debug)]
pub struct SerialSource {
    next: Cell<u64>,
}

impl SerialSource {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first: u64) -> Self {
        Self {
            next: Cell::new(first.max(1)),
        }
    }

    pub fn next_serial(&self) -> u64 {
        let serial = self.next.get();
        match serial.checked_add(1) {
            Some(next) => self.next.set(next),
            None => {
                error!("handle serial counter wrapped; stale handles may alias new ones");
                self.next.set(1);
            }
        }
        serial
    }
}

impl Default for SerialSource {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    callback: Callback,
    serial: u64,
}

#[derive(Default)]
struct Layer {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    live: usize,
}

impl Layer {
    fn entry(&self, handle: Handle) -> Option<&Entry> {
        self.slots
            .get(handle.slot() as usize)?
            .as_ref()
            .filter(|entry| entry.serial == handle.serial())
    }
}

pub struct HandleTable {
    layers: Vec<Layer>,
    serials: Rc<SerialSource>,
}

impl HandleTable {
    /// Table with a private serial counter.
    pub fn new() -> Self {
        Self::with_serials(Rc::new(SerialSource::new()))
    }

    /// Table drawing serials from a shared counter.
    pub fn with_serials(serials: Rc<SerialSource>) -> Self {
        Self {
            layers: Vec::new(),
            serials,
        }
    }

    /// Append `count` empty layers and return the first of them.
    pub fn allocate(&mut self, count: usize) -> Result<LayerId, LayerOverflow> {
        let first = self.layers.len();
        if first + count.max(1) > MAX_LAYERS {
            return Err(LayerOverflow {
                requested: count,
                allocated: first,
            });
        }
        self.layers.resize_with(first + count, Layer::default);
        Ok(LayerId(first as u8))
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Bind a callback on `layer`.
    ///
    /// Returns [`Handle::INVALID`] for a missing callback or an unknown layer.
    pub fn add_callback(&mut self, layer: LayerId, callback: Option<Callback>) -> Handle {
        let (Some(callback), Some(slots)) = (callback, self.layers.get_mut(layer.index())) else {
            return Handle::INVALID;
        };

        let serial = self.serials.next_serial();
        let entry = Entry { callback, serial };
        let slot = match slots.free.pop() {
            Some(slot) => {
                slots.slots[slot as usize] = Some(entry);
                slot
            }
            None => {
                slots.slots.push(Some(entry));
                (slots.slots.len() - 1) as u32
            }
        };
        slots.live += 1;

        let handle = Handle::new(layer, slot, serial);
        trace!(?handle, "bound callback");
        handle
    }

    pub fn copy_callback_into(&mut self, layer: LayerId, callback: &Callback) -> Handle {
        self.add_callback(layer, Some(Rc::clone(callback)))
    }

    /// Unbind the callback `handle` refers to. Stale or invalid handles are
    /// ignored and report `false`.
    pub fn remove_callback(&mut self, handle: Handle) -> bool {
        if !handle.is_valid() {
            return false;
        }
        let Some(layer) = self.layers.get_mut(handle.layer().index()) else {
            return false;
        };
        if layer.entry(handle).is_none() {
            return false;
        }

        layer.slots[handle.slot() as usize] = None;
        layer.free.push(handle.slot());
        layer.live -= 1;
        trace!(?handle, "unbound callback");
        true
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.callback(handle).is_some()
    }

    pub fn callback(&self, handle: Handle) -> Option<Callback> {
        if !handle.is_valid() {
            return None;
        }
        let entry = self.layers.get(handle.layer().index())?.entry(handle)?;
        Some(Rc::clone(&entry.callback))
    }

    /// Snapshot of every callback bound on `layer`.
    pub fn callbacks(&self, layer: LayerId) -> Vec<Callback> {
        self.layers
            .get(layer.index())
            .map(|layer| {
                layer
                    .slots
                    .iter()
                    .flatten()
                    .map(|entry| Rc::clone(&entry.callback))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of callbacks bound on `layer`.
    pub fn len(&self, layer: LayerId) -> usize {
        self.layers.get(layer.index()).map_or(0, |layer| layer.live)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|layer| layer.live == 0)
    }

    pub fn clear_layer(&mut self, layer: LayerId) {
        if let Some(layer) = self.layers.get_mut(layer.index()) {
            *layer = Layer::default();
        }
    }

    pub fn clear_all(&mut self) {
        for layer in &mut self.layers {
            *layer = Layer::default();
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live: Vec<usize> = self.layers.iter().map(|layer| layer.live).collect();
        f.debug_struct("HandleTable").field("live", &live).finish()
    }
}

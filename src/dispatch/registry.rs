//! Dispatch table keyed by message type id.
//!
//! The table maps a type id, plus a secondary index for ids registered
//! more than once, to exactly one handler. Entries are kept sorted by
//! `(id, index)` so both lookup strategies walk the same data.
//!
//! # Example
//!
//! ```
//! use mqttsn_client::dispatch::{DispatchStrategy, Dispatcher};
//!
//! let mut dispatcher = Dispatcher::new(DispatchStrategy::BinarySearch);
//! dispatcher.register(0x05, "connack");
//! dispatcher.register(0x17, "pingresp");
//!
//! assert_eq!(*dispatcher.lookup(0x17).unwrap(), "pingresp");
//! assert!(dispatcher.lookup(0x03).is_err());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{MqttsnError, Result};

/// How [`Dispatcher::lookup`] walks the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    /// Scan every entry in order.
    Linear,
    /// Binary search over the sorted entries.
    #[default]
    BinarySearch,
}

/// Entry for a registered handler.
struct Entry<H> {
    /// Message type id.
    id: u8,
    /// Registration order among entries sharing `id`.
    index: usize,
    handler: H,
}

/// Table routing type ids to handlers.
pub struct Dispatcher<H> {
    /// Sorted by `(id, index)`.
    entries: Vec<Entry<H>>,
    strategy: DispatchStrategy,
}

impl<H> Dispatcher<H> {
    /// Create an empty dispatcher.
    pub fn new(strategy: DispatchStrategy) -> Self {
        Self {
            entries: Vec::new(),
            strategy,
        }
    }

    /// Register a handler for `id`.
    ///
    /// Returns the secondary index assigned to it: 0 for the first handler
    /// of an id, 1 for the second, and so on.
    pub fn register(&mut self, id: u8, handler: H) -> usize {
        let index = self.entries.iter().filter(|e| e.id == id).count();
        let at = self
            .entries
            .partition_point(|e| (e.id, e.index) < (id, index));
        self.entries.insert(at, Entry { id, index, handler });
        index
    }

    /// Look up the primary handler for `id`.
    pub fn lookup(&self, id: u8) -> Result<&H> {
        self.lookup_at(id, 0)
    }

    /// Look up the handler registered at `index` for `id`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMessage` if no such handler exists.
    pub fn lookup_at(&self, id: u8, index: usize) -> Result<&H> {
        let position = match self.strategy {
            DispatchStrategy::Linear => self.linear_position(id, index),
            DispatchStrategy::BinarySearch => self.binary_position(id, index),
        };

        position
            .map(|p| &self.entries[p].handler)
            .ok_or(MqttsnError::UnsupportedMessage(id))
    }

    fn linear_position(&self, id: u8, index: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.id == id && e.index == index)
    }

    fn binary_position(&self, id: u8, index: usize) -> Option<usize> {
        self.entries
            .binary_search_by(|e| (e.id, e.index).cmp(&(id, index)))
            .ok()
    }

    /// Check if a handler is registered for `id`.
    pub fn contains(&self, id: u8) -> bool {
        self.lookup(id).is_ok()
    }

    /// Number of handlers registered for `id`.
    pub fn handler_count(&self, id: u8) -> usize {
        self.entries.iter().filter(|e| e.id == id).count()
    }

    /// Registered ids in ascending order, duplicates removed.
    pub fn ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.entries.iter().map(|e| e.id).collect();
        ids.dedup();
        ids
    }

    pub fn strategy(&self) -> DispatchStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: DispatchStrategy) {
        self.strategy = strategy;
    }

    /// Total number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Default for Dispatcher<H> {
    fn default() -> Self {
        Self::new(DispatchStrategy::default())
    }
}

impl<H> std::fmt::Debug for Dispatcher<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("strategy", &self.strategy)
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(strategy: DispatchStrategy) -> Dispatcher<u32> {
        let mut dispatcher = Dispatcher::new(strategy);
        // Out of order on purpose, with one id registered twice.
        for (id, handler) in [(0x17u8, 1u32), (0x00, 2), (0x0C, 3), (0x05, 4), (0x0C, 5), (0x1D, 6)] {
            dispatcher.register(id, handler);
        }
        dispatcher
    }

    #[test]
    fn test_register_assigns_secondary_index() {
        let mut dispatcher = Dispatcher::new(DispatchStrategy::Linear);
        assert_eq!(dispatcher.register(0x0C, "a"), 0);
        assert_eq!(dispatcher.register(0x0C, "b"), 1);
        assert_eq!(dispatcher.register(0x0D, "c"), 0);

        assert_eq!(dispatcher.handler_count(0x0C), 2);
        assert_eq!(*dispatcher.lookup_at(0x0C, 1).unwrap(), "b");
        assert_eq!(dispatcher.len(), 3);
    }

    #[test]
    fn test_strategies_agree_for_every_id() {
        let linear = build(DispatchStrategy::Linear);
        let binary = build(DispatchStrategy::BinarySearch);

        for id in 0..=u8::MAX {
            for index in 0..3 {
                let a = linear.lookup_at(id, index).ok().copied();
                let b = binary.lookup_at(id, index).ok().copied();
                assert_eq!(a, b, "id {:#04x} index {}", id, index);
            }
        }
    }

    #[test]
    fn test_lookup_selects_registered_handler() {
        for strategy in [DispatchStrategy::Linear, DispatchStrategy::BinarySearch] {
            let dispatcher = build(strategy);
            assert_eq!(*dispatcher.lookup(0x17).unwrap(), 1);
            assert_eq!(*dispatcher.lookup(0x00).unwrap(), 2);
            assert_eq!(*dispatcher.lookup(0x0C).unwrap(), 3);
            assert_eq!(*dispatcher.lookup_at(0x0C, 1).unwrap(), 5);
            assert_eq!(*dispatcher.lookup(0x1D).unwrap(), 6);
        }
    }

    #[test]
    fn test_unknown_id_is_unsupported() {
        for strategy in [DispatchStrategy::Linear, DispatchStrategy::BinarySearch] {
            let dispatcher = build(strategy);
            assert!(matches!(
                dispatcher.lookup(0xFE),
                Err(MqttsnError::UnsupportedMessage(0xFE))
            ));
            assert!(matches!(
                dispatcher.lookup_at(0x17, 1),
                Err(MqttsnError::UnsupportedMessage(0x17))
            ));
        }
    }

    #[test]
    fn test_empty_dispatcher() {
        let dispatcher: Dispatcher<u32> = Dispatcher::default();
        assert!(dispatcher.is_empty());
        assert_eq!(dispatcher.strategy(), DispatchStrategy::BinarySearch);
        assert!(dispatcher.lookup(0).is_err());
    }

    #[test]
    fn test_ids_sorted_and_deduplicated() {
        let dispatcher = build(DispatchStrategy::Linear);
        assert_eq!(dispatcher.ids(), vec![0x00, 0x05, 0x0C, 0x17, 0x1D]);
        assert!(dispatcher.contains(0x05));
        assert!(!dispatcher.contains(0x06));
    }

    #[test]
    fn test_set_strategy() {
        let mut dispatcher = build(DispatchStrategy::Linear);
        dispatcher.set_strategy(DispatchStrategy::BinarySearch);
        assert_eq!(dispatcher.strategy(), DispatchStrategy::BinarySearch);
        assert_eq!(*dispatcher.lookup(0x05).unwrap(), 4);
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&DispatchStrategy::BinarySearch).unwrap();
        assert_eq!(json, "\"binary_search\"");
        let parsed: DispatchStrategy = serde_json::from_str("\"linear\"").unwrap();
        assert_eq!(parsed, DispatchStrategy::Linear);
    }
}

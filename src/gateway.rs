//! Known gateways.
//!
//! Gateways enter the table through ADVERTISE broadcasts (which carry a
//! lifetime) or GWINFO search replies (which do not). Advertised entries
//! that are not renewed within their duration are removed by
//! [`GatewayTable::expire_check`].

use bytes::Bytes;

/// Status reported through the gateway status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GwStatus {
    /// Learned from an ADVERTISE broadcast.
    Advertised,
    /// Learned from a GWINFO search reply.
    Discovered,
    /// Removed explicitly or after its advertised duration lapsed.
    Discarded,
}

/// One known gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEntry {
    pub id: u8,
    /// Opaque transport address.
    pub address: Bytes,
    /// Engine clock value of the last advertisement or reply.
    pub last_seen_ms: u64,
    /// Advertised lifetime; `None` never expires.
    pub duration_secs: Option<u16>,
}

impl GatewayEntry {
    /// Clock value after which the entry is stale.
    pub fn expires_at(&self) -> Option<u64> {
        self.duration_secs
            .map(|d| self.last_seen_ms + u64::from(d) * 1000)
    }
}

/// Table of known gateways, ordered by id.
#[derive(Debug, Default)]
pub struct GatewayTable {
    entries: Vec<GatewayEntry>,
}

impl GatewayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ADVERTISE from gateway `id`.
    ///
    /// Returns `Some(Advertised)` when the gateway was not known before.
    pub fn record_advertisement(
        &mut self,
        id: u8,
        duration_secs: u16,
        address: Bytes,
        now_ms: u64,
    ) -> Option<GwStatus> {
        self.record(id, Some(duration_secs), address, now_ms)
            .then_some(GwStatus::Advertised)
    }

    /// Record a GWINFO reply from gateway `id`.
    ///
    /// Returns `Some(Discovered)` when the gateway was not known before.
    /// A reply never shortens the lifetime set by an earlier advertisement.
    pub fn record_search_reply(&mut self, id: u8, address: Bytes, now_ms: u64) -> Option<GwStatus> {
        self.record(id, None, address, now_ms)
            .then_some(GwStatus::Discovered)
    }

    /// Returns true if the entry is new.
    fn record(&mut self, id: u8, duration: Option<u16>, address: Bytes, now_ms: u64) -> bool {
        match self.entries.binary_search_by_key(&id, |e| e.id) {
            Ok(i) => {
                let entry = &mut self.entries[i];
                entry.last_seen_ms = now_ms;
                if duration.is_some() {
                    entry.duration_secs = duration;
                }
                if !address.is_empty() {
                    entry.address = address;
                }
                false
            }
            Err(i) => {
                self.entries.insert(
                    i,
                    GatewayEntry {
                        id,
                        address,
                        last_seen_ms: now_ms,
                        duration_secs: duration,
                    },
                );
                true
            }
        }
    }

    /// Remove gateway `id`. Returns false if it was not known.
    pub fn discard(&mut self, id: u8) -> bool {
        match self.entries.binary_search_by_key(&id, |e| e.id) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove every gateway, returning the removed ids.
    pub fn discard_all(&mut self) -> Vec<u8> {
        self.entries.drain(..).map(|e| e.id).collect()
    }

    /// Remove entries whose advertised duration lapsed before `now_ms`.
    ///
    /// An entry survives while `last_seen + duration * 1000 >= now`.
    pub fn expire_check(&mut self, now_ms: u64) -> Vec<u8> {
        let mut expired = Vec::new();
        self.entries.retain(|e| match e.expires_at() {
            Some(at) if at < now_ms => {
                expired.push(e.id);
                false
            }
            _ => true,
        });
        expired
    }

    /// Earliest clock value at which `expire_check` will remove something.
    pub fn next_expiry(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter_map(GatewayEntry::expires_at)
            .min()
            .map(|at| at + 1)
    }

    pub fn get(&self, id: u8) -> Option<&GatewayEntry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &GatewayEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: &'static [u8]) -> Bytes {
        Bytes::from_static(b)
    }

    #[test]
    fn test_new_entries_report_status_once() {
        let mut table = GatewayTable::new();

        assert_eq!(
            table.record_advertisement(1, 30, addr(b"a"), 0),
            Some(GwStatus::Advertised)
        );
        assert_eq!(table.record_advertisement(1, 30, addr(b"a"), 10), None);
        assert_eq!(
            table.record_search_reply(2, addr(b"b"), 20),
            Some(GwStatus::Discovered)
        );
        assert_eq!(table.record_search_reply(1, Bytes::new(), 30), None);

        assert_eq!(table.len(), 2);
        let entry = table.get(1).unwrap();
        assert_eq!(entry.last_seen_ms, 30);
        assert_eq!(entry.duration_secs, Some(30));
        assert_eq!(entry.address, addr(b"a"));
    }

    #[test]
    fn test_expiry_boundary() {
        let mut table = GatewayTable::new();
        table.record_advertisement(7, 30, addr(b"gw"), 1_000);

        assert_eq!(table.next_expiry(), Some(31_001));
        assert!(table.expire_check(31_000).is_empty());
        assert_eq!(table.expire_check(31_001), vec![7]);
        assert!(table.expire_check(40_000).is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_refresh_postpones_expiry() {
        let mut table = GatewayTable::new();
        table.record_advertisement(7, 30, addr(b"gw"), 0);
        table.record_advertisement(7, 30, addr(b"gw"), 20_000);

        assert!(table.expire_check(30_001).is_empty());
        assert_eq!(table.expire_check(50_001), vec![7]);
    }

    #[test]
    fn test_search_reply_never_expires() {
        let mut table = GatewayTable::new();
        table.record_search_reply(3, addr(b"gw"), 0);

        assert_eq!(table.next_expiry(), None);
        assert!(table.expire_check(u64::MAX).is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let mut table = GatewayTable::new();
        table.record_search_reply(3, addr(b"gw"), 0);

        assert!(table.discard(3));
        assert!(!table.discard(3));
        assert!(!table.discard(99));
    }

    #[test]
    fn test_discard_all() {
        let mut table = GatewayTable::new();
        table.record_search_reply(9, addr(b"x"), 0);
        table.record_advertisement(2, 60, addr(b"y"), 0);

        assert_eq!(table.discard_all(), vec![2, 9]);
        assert!(table.discard_all().is_empty());
        assert_eq!(table.next_expiry(), None);
    }
}

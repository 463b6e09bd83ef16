//! Management Information Base
//!
//! The MIB is a flat table of (OID, value) entries held in strictly
//! ascending OID order. The order is established once at build time and
//! never changes afterwards; refreshes only replace values. GET resolves
//! by binary search, GETNEXT by the partition point - no hash maps, so
//! successor queries are well-defined.

pub mod host;

pub use host::{HostMib, Refresh};

use crate::protocols::{Oid, Value};
use crate::{Error, Result};

/// One managed object instance.
#[derive(Debug, Clone)]
pub struct MibEntry {
    pub oid: Oid,
    pub value: Value,
}

/// Ordered table of MIB entries.
#[derive(Debug, Default)]
pub struct Mib {
    entries: Vec<MibEntry>,
}

impl Mib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MibEntry> {
        self.entries.iter()
    }

    /// Appends an entry. Registration order must already be ascending;
    /// anything else is a bug in the registration sequence.
    pub fn register(&mut self, oid: Oid, value: Value) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if last.oid >= oid {
                return Err(Error::mib(format!(
                    "registration out of order: {} after {}",
                    oid, last.oid
                )));
            }
        }
        self.entries.push(MibEntry { oid, value });
        Ok(())
    }

    /// Exact lookup.
    pub fn get(&self, oid: &Oid) -> Option<&MibEntry> {
        self.entries
            .binary_search_by(|e| e.oid.cmp(oid))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Smallest entry strictly greater than `oid`, the GETNEXT primitive.
    pub fn next_after(&self, oid: &Oid) -> Option<&MibEntry> {
        let i = self.entries.partition_point(|e| e.oid <= *oid);
        self.entries.get(i)
    }

    /// Replaces the value of an existing entry. The OID set is immutable
    /// after build, so a missing entry is an error rather than an insert.
    pub fn set(&mut self, oid: &Oid, value: Value) -> Result<()> {
        match self.entries.binary_search_by(|e| e.oid.cmp(oid)) {
            Ok(i) => {
                self.entries[i].value = value;
                Ok(())
            }
            Err(_) => Err(Error::mib(format!("no such entry: {}", oid))),
        }
    }

    /// True when another instance of the same column exists: an entry of
    /// equal arc count differing only in the final sub-identifier. Used to
    /// pick between the v2c noSuchInstance and noSuchObject markers.
    pub fn has_sibling_instance(&self, oid: &Oid) -> bool {
        if oid.len() < 2 {
            return false;
        }
        let column = &oid.components()[..oid.len() - 1];
        let prefix = match Oid::from_slice(column) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let start = self.entries.partition_point(|e| e.oid < prefix);
        self.entries[start..]
            .iter()
            .take_while(|e| e.oid.starts_with(&prefix))
            .any(|e| e.oid.len() == oid.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn sample() -> Mib {
        let mut mib = Mib::new();
        for (o, v) in [
            ("1.3.6.1.2.1.1.1.0", Value::OctetString(b"descr".to_vec())),
            ("1.3.6.1.2.1.1.3.0", Value::TimeTicks(0)),
            ("1.3.6.1.2.1.2.2.1.10.1", Value::Counter32(0)),
            ("1.3.6.1.2.1.2.2.1.10.2", Value::Counter32(0)),
            ("1.3.6.1.4.1.2021.11.50.0", Value::Counter32(0)),
        ] {
            mib.register(oid(o), v).unwrap();
        }
        mib
    }

    #[test]
    fn register_enforces_ascending_order() {
        let mut mib = sample();
        assert!(mib.register(oid("1.3.6.1.2.1.1.2.0"), Value::Null).is_err());
        assert!(mib
            .register(oid("1.3.6.1.4.1.2021.11.50.0"), Value::Null)
            .is_err());
        assert!(mib
            .register(oid("1.3.6.1.4.1.2021.11.51.0"), Value::Null)
            .is_ok());
    }

    #[test]
    fn entries_stay_sorted() {
        let mib = sample();
        let oids: Vec<_> = mib.iter().map(|e| e.oid.clone()).collect();
        for pair in oids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn exact_lookup() {
        let mib = sample();
        assert!(mib.get(&oid("1.3.6.1.2.1.1.3.0")).is_some());
        assert!(mib.get(&oid("1.3.6.1.2.1.1.2.0")).is_none());
        assert!(mib.get(&oid("1.3.6.1.2.1.1.3")).is_none());
    }

    #[test]
    fn successor_queries() {
        let mib = sample();
        assert_eq!(
            mib.next_after(&oid("1.3.6.1.2.1.1.1.0")).unwrap().oid,
            oid("1.3.6.1.2.1.1.3.0")
        );
        // Strictly greater: a non-entry OID between two entries.
        assert_eq!(
            mib.next_after(&oid("1.3.6.1.2.1.1.2.0")).unwrap().oid,
            oid("1.3.6.1.2.1.1.3.0")
        );
        // From the root, the first entry.
        assert_eq!(
            mib.next_after(&oid("0.0")).unwrap().oid,
            oid("1.3.6.1.2.1.1.1.0")
        );
        // At or past the end, nothing.
        assert!(mib.next_after(&oid("1.3.6.1.4.1.2021.11.50.0")).is_none());
        assert!(mib.next_after(&oid("2.0")).is_none());
    }

    #[test]
    fn set_replaces_values_only() {
        let mut mib = sample();
        let before: Vec<_> = mib.iter().map(|e| e.oid.clone()).collect();
        mib.set(&oid("1.3.6.1.2.1.1.3.0"), Value::TimeTicks(4711))
            .unwrap();
        assert!(mib.set(&oid("1.3.6.1.2.1.1.4.0"), Value::Null).is_err());
        let after: Vec<_> = mib.iter().map(|e| e.oid.clone()).collect();
        assert_eq!(before, after);
        assert_eq!(
            mib.get(&oid("1.3.6.1.2.1.1.3.0")).unwrap().value,
            Value::TimeTicks(4711)
        );
    }

    #[test]
    fn sibling_instance_detection() {
        let mib = sample();
        // ifInOctets.3 does not exist but the column does.
        assert!(mib.has_sibling_instance(&oid("1.3.6.1.2.1.2.2.1.10.3")));
        // sysUpTime.1: instance 0 exists under the same column.
        assert!(mib.has_sibling_instance(&oid("1.3.6.1.2.1.1.3.1")));
        // Entirely unknown column.
        assert!(!mib.has_sibling_instance(&oid("1.3.6.1.2.1.1.99.0")));
    }
}

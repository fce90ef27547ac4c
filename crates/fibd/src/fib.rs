//! Authoritative forwarding table owned by the coordinator.

use serde::Serialize;
use std::collections::HashMap;
use switch_types::MacAddress;

/// One forwarding entry: where a MAC was last seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibEntry {
    pub port: String,
    /// Unix seconds of the learn; zero for permanent entries
    pub age: i64,
    pub permanent: bool,
}

impl FibEntry {
    pub fn learned(port: impl Into<String>, age: i64) -> Self {
        Self {
            port: port.into(),
            age,
            permanent: false,
        }
    }

    pub fn permanent(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            age: 0,
            permanent: true,
        }
    }
}

/// Serializable view of a table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FibRecord {
    pub mac: MacAddress,
    pub port: String,
    pub age: i64,
    pub permanent: bool,
}

/// MAC-keyed table; a map, so one entry per MAC by construction.
#[derive(Debug, Default)]
pub struct FibTable {
    entries: HashMap<MacAddress, FibEntry>,
}

impl FibTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `mac`, returning the previous one.
    pub fn insert(&mut self, mac: MacAddress, entry: FibEntry) -> Option<FibEntry> {
        self.entries.insert(mac, entry)
    }

    pub fn remove(&mut self, mac: &MacAddress) -> Option<FibEntry> {
        self.entries.remove(mac)
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&FibEntry> {
        self.entries.get(mac)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry owned by `port` and returns their MACs, sorted.
    pub fn drain_port(&mut self, port: &str) -> Vec<MacAddress> {
        let mut macs: Vec<MacAddress> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.port == port)
            .map(|(mac, _)| *mac)
            .collect();
        macs.sort();
        for mac in &macs {
            self.entries.remove(mac);
        }
        macs
    }

    /// All rows sorted by MAC.
    pub fn snapshot(&self) -> Vec<FibRecord> {
        let mut records: Vec<FibRecord> = self
            .entries
            .iter()
            .map(|(mac, entry)| FibRecord {
                mac: *mac,
                port: entry.port.clone(),
                age: entry.age,
                permanent: entry.permanent,
            })
            .collect();
        records.sort_by_key(|r| r.mac);
        records
    }
}

/// Counters kept by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FibStats {
    pub learned: u64,
    pub moved: u64,
    pub expired: u64,
    pub static_added: u64,
    pub flushed: u64,
    pub ports_added: u64,
    pub ports_removed: u64,
    pub attach_failures: u64,
    pub pipeline_failures: u64,
}

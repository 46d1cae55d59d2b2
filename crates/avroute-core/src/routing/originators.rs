//! Id-keyed tables of sources and destinations.

use std::collections::BTreeMap;

use crate::domain::endpoint::EndpointInfo;
use crate::domain::originator::Originator;

/// Sources or destinations keyed by id, iterated in id order.
#[derive(Debug, Clone)]
pub struct OriginatorTable<T: Originator> {
    entries: BTreeMap<T::Id, T>,
}

impl<T: Originator> Default for OriginatorTable<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Originator> OriginatorTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry, returning the previous one.
    pub fn insert(&mut self, entry: T) -> Option<T> {
        self.entries.insert(entry.id(), entry)
    }

    pub fn remove(&mut self, id: T::Id) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: T::Id) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    /// Entries from local configuration.
    pub fn local(&self) -> impl Iterator<Item = &T> {
        self.entries.values().filter(|e| !e.is_remote())
    }

    /// Entries learned from other cores.
    pub fn remote(&self) -> impl Iterator<Item = &T> {
        self.entries.values().filter(|e| e.is_remote())
    }

    pub fn find_by_endpoint(&self, endpoint: EndpointInfo) -> Option<&T> {
        self.entries.values().find(|e| e.endpoint() == endpoint)
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
    use crate::domain::endpoint::ConnectionType;
    use crate::domain::originator::{Source, SourceId};

    fn source(id: u32, remote: bool) -> Source {
        Source {
            id: SourceId(id),
            name: format!("Source {id}"),
            endpoint: EndpointInfo::new(id, 0, 1),
            connection_type: ConnectionType::VIDEO,
            remote,
        }
    }

    #[test]
    fn test_local_and_remote_are_partitioned() {
        let mut table = OriginatorTable::new();
        table.insert(source(1, false));
        table.insert(source(2, true));
        table.insert(source(3, false));

        let local: Vec<_> = table.local().map(|s| s.id).collect();
        let remote: Vec<_> = table.remote().map(|s| s.id).collect();

        assert_eq!(local, vec![SourceId(1), SourceId(3)]);
        assert_eq!(remote, vec![SourceId(2)]);
    }

    #[test]
    fn test_insert_replaces_and_returns_previous() {
        let mut table = OriginatorTable::new();
        table.insert(source(1, true));

        let previous = table.insert(source(1, false));

        assert!(previous.is_some_and(|p| p.remote));
        assert_eq!(table.len(), 1);
        assert!(table.find_by_endpoint(EndpointInfo::new(1, 0, 1)).is_some());
    }
}

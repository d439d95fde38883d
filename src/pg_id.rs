use std::collections::BTreeMap;

/// Packet group ids assigned per generator port.
///
/// Packet group ids tag streams so the generator can report latency per
/// stream. Ids are allocated from one counter shared by all ports, starting
/// at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortPgIdMap {
    pg_id: u32,
    last_port: Option<u16>,
    map: BTreeMap<u16, Vec<u32>>,
}

impl PortPgIdMap {
    pub fn new() -> Self {
        PortPgIdMap::default()
    }

    /// Register `port` and make it the current port.
    ///
    /// Any ids previously allocated for the port are forgotten.
    pub fn add_port(&mut self, port: u16) {
        self.last_port = Some(port);
        self.map.insert(port, vec![]);
    }

    /// Ids allocated for `port`, in allocation order.
    pub fn get_pg_ids(&self, port: u16) -> &[u32] {
        self.map.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Allocate the next id for `port`, or for the most recently added port.
    ///
    /// A port not seen before is added first.
    ///
    /// Returns `None` when no port is given and none has been added.
    pub fn increase_pg_id(&mut self, port: Option<u16>) -> Option<u32> {
        let port = port.or(self.last_port)?;

        if !self.map.contains_key(&port) {
            self.add_port(port);
        }

        self.pg_id += 1;
        self.map.entry(port).or_default().push(self.pg_id);

        Some(self.pg_id)
    }

    /// Ports in ascending order with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u32])> + '_ {
        self.map.iter().map(|(port, ids)| (*port, ids.as_slice()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocate_on_last_port() {
        let mut map = PortPgIdMap::new();

        map.add_port(10);
        assert_eq!(map.increase_pg_id(None), Some(1));
        assert_eq!(map.increase_pg_id(None), Some(2));
        map.add_port(20);
        assert_eq!(map.increase_pg_id(None), Some(3));

        assert_eq!(map.get_pg_ids(10), &[1, 2]);
        assert_eq!(map.get_pg_ids(20), &[3]);
    }

    #[test]
    fn explicit_port() {
        let mut map = PortPgIdMap::new();
        map.add_port(10);
        map.add_port(20);

        assert_eq!(map.increase_pg_id(Some(10)), Some(1));
        assert_eq!(map.increase_pg_id(Some(30)), Some(2));

        assert_eq!(map.get_pg_ids(10), &[1]);
        assert_eq!(map.get_pg_ids(20), &[] as &[u32]);
        assert_eq!(map.get_pg_ids(30), &[2]);
    }

    #[test]
    fn no_port() {
        let mut map = PortPgIdMap::new();
        assert_eq!(map.increase_pg_id(None), None);
        assert_eq!(map.get_pg_ids(10), &[] as &[u32]);
    }

    #[test]
    fn iter_in_port_order() {
        let mut map = PortPgIdMap::new();
        map.add_port(20);
        map.increase_pg_id(None);
        map.add_port(10);
        map.increase_pg_id(None);

        let ports: Vec<_> = map.iter().map(|(p, _)| p).collect();
        assert_eq!(ports, vec![10, 20]);
    }
}

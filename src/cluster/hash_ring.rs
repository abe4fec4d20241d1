//! Consistent hash ring with virtual nodes.
//!
//! Each member is hashed onto the ring at many positions so that adding or
//! removing a member only relocates keys from that member's positions.
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::net::SocketAddr;

use twox_hash::XxHash64;

/// Positions each member occupies on the ring
pub const DEFAULT_VNODES_PER_MEMBER: usize = 160;

#[derive(Clone, Debug)]
pub struct HashRing {
    vnodes: BTreeMap<u64, SocketAddr>,
    members: Vec<SocketAddr>,
}

impl HashRing {
    pub fn new(members: &[SocketAddr]) -> Self {
        Self::with_vnodes(members, DEFAULT_VNODES_PER_MEMBER)
    }

    /// The ring depends only on the member set, never on the order given.
    pub fn with_vnodes(members: &[SocketAddr], vnodes_per_member: usize) -> Self {
        let mut members = members.to_vec();
        members.sort();
        members.dedup();

        let mut vnodes = BTreeMap::new();
        for member in &members {
            for i in 0..vnodes_per_member.max(1) {
                let position = hash_bytes(format!("{}#{}", member, i).as_bytes());
                // on a collision the lowest address keeps the position
                vnodes
                    .entry(position)
                    .and_modify(|owner: &mut SocketAddr| {
                        if *member < *owner {
                            *owner = *member;
                        }
                    })
                    .or_insert(*member);
            }
        }
        Self { vnodes, members }
    }

    pub fn members(&self) -> &[SocketAddr] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every member in preference order for `key`: the first is the primary
    /// owner, the rest are the order in which to fail over.
    pub fn owners(&self, key: &[u8]) -> Vec<SocketAddr> {
        let mut owners = Vec::with_capacity(self.members.len());
        if self.vnodes.is_empty() {
            return owners;
        }
        let position = hash_bytes(key);
        let walk = self
            .vnodes
            .range(position..)
            .chain(self.vnodes.range(..position));
        for (_, member) in walk {
            if !owners.contains(member) {
                owners.push(*member);
                if owners.len() == self.members.len() {
                    break;
                }
            }
        }
        owners
    }

    pub fn primary(&self, key: &[u8]) -> Option<SocketAddr> {
        self.owners(key).into_iter().next()
    }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(ports: &[u16]) -> Vec<SocketAddr> {
        ports
            .iter()
            .map(|p| SocketAddr::from(([10, 0, 0, 1], *p)))
            .collect()
    }

    #[test]
    fn empty_ring_has_no_owners() {
        let ring = HashRing::new(&[]);
        assert!(ring.is_empty());
        assert!(ring.owners(b"key").is_empty());
        assert_eq!(ring.primary(b"key"), None);
    }

    #[test]
    fn owners_lists_every_member_once() {
        let members = addrs(&[8001, 8002, 8003]);
        let ring = HashRing::new(&members);
        let owners = ring.owners(b"some-key");
        assert_eq!(owners.len(), 3);
        for member in &members {
            assert!(owners.contains(member));
        }
    }

    #[test]
    fn member_order_does_not_matter() {
        let ring_a = HashRing::new(&addrs(&[8001, 8002, 8003]));
        let ring_b = HashRing::new(&addrs(&[8003, 8001, 8002, 8001]));
        for i in 0..200 {
            let key = format!("key-{}", i);
            assert_eq!(ring_a.owners(key.as_bytes()), ring_b.owners(key.as_bytes()));
        }
    }

    #[test]
    fn keys_spread_over_members() {
        let ring = HashRing::new(&addrs(&[8001, 8002, 8003, 8004]));
        let mut counts = std::collections::HashMap::new();
        for i in 0..4_000 {
            let key = format!("key-{}", i);
            *counts.entry(ring.primary(key.as_bytes()).unwrap()).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 4);
        for count in counts.values() {
            assert!(*count > 500, "uneven distribution: {:?}", counts);
        }
    }
}

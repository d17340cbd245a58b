//! The migration/pull wire format (§6 "Wire format"): an Ethernet-like
//! frame (ethertype `0x9876`, last MAC byte = node id) carrying one of
//! four packet kinds.
//!
//! Framing is grounded on `EthernetFrame` in the teacher pack's network
//! stack (build/parse a fixed 14-byte header around an opaque payload);
//! the payload codec below is specific to this protocol.

use super::rr::Rr;
use crate::mm::frame::NodeId;
use crate::process::Registers;

pub const ETHERTYPE_MIGRATION: u16 = 0x9876;
pub const MAC_HEADER_LEN: usize = 14;

/// The three PULLRP fragment sizes, summing to exactly one page
/// (§6 "the three parts partition a 4 KB page into fixed sizes").
pub const PART_SIZES: [usize; 3] = [1366, 1365, 1365];
pub const PART_OFFSETS: [usize; 3] = [0, 1366, 2731];

fn node_mac(node: NodeId) -> [u8; 6] {
    [0, 0, 0, 0, 0, node]
}

/// Wraps `payload` in a minimal Ethernet-shaped header addressed by
/// node id (last MAC byte only; the other five bytes are unused here).
pub fn build_frame(src: NodeId, dst: NodeId, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAC_HEADER_LEN + payload.len());
    out.extend_from_slice(&node_mac(dst));
    out.extend_from_slice(&node_mac(src));
    out.extend_from_slice(&ETHERTYPE_MIGRATION.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parsed header fields plus a borrow of the payload. Returns `None` on
/// a short or non-matching frame, which `net_rx` silently drops (§7
/// "Packet corruption / stray -> Drop silently").
pub fn parse_frame(data: &[u8]) -> Option<(NodeId, NodeId, u16, &[u8])> {
    if data.len() < MAC_HEADER_LEN {
        return None;
    }
    let dst = data[5];
    let src = data[11];
    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    Some((dst, src, ethertype, &data[MAC_HEADER_LEN..]))
}

/// The one-byte packet type that begins every payload body (§6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum PacketKind {
    MigrQ = 0,
    MigrP = 1,
    PullRq = 2,
    PullRp = 3,
}

/// A decoded payload body.
#[derive(Clone, Debug)]
pub enum Packet {
    MigrQ {
        home: Rr,
        pdir: Rr,
        state: Registers,
    },
    MigrP {
        home: Rr,
    },
    PullRq {
        rr: Rr,
        pglev: u8,
        /// Bitmap, bits 0..2, of fragments still wanted.
        need: u8,
    },
    PullRp {
        rr: Rr,
        part: u8,
        payload: Vec<u8>,
    },
}

fn encode_registers(r: &Registers, out: &mut Vec<u8>) {
    for g in r.gpr {
        out.extend_from_slice(&g.to_be_bytes());
    }
    out.extend_from_slice(&r.rip.to_be_bytes());
    out.extend_from_slice(&r.rflags.to_be_bytes());
}

fn decode_registers(data: &[u8]) -> Option<Registers> {
    if data.len() < 16 * 8 + 16 {
        return None;
    }
    let mut gpr = [0u64; 16];
    for (i, g) in gpr.iter_mut().enumerate() {
        *g = u64::from_be_bytes(data[i * 8..i * 8 + 8].try_into().ok()?);
    }
    let rip = u64::from_be_bytes(data[128..136].try_into().ok()?);
    let rflags = u64::from_be_bytes(data[136..144].try_into().ok()?);
    Some(Registers { gpr, rip, rflags })
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Packet::MigrQ { home, pdir, state } => {
                out.push(PacketKind::MigrQ as u8);
                out.extend_from_slice(&home.encode().to_be_bytes());
                out.extend_from_slice(&pdir.encode().to_be_bytes());
                encode_registers(state, &mut out);
            }
            Packet::MigrP { home } => {
                out.push(PacketKind::MigrP as u8);
                out.extend_from_slice(&home.encode().to_be_bytes());
            }
            Packet::PullRq { rr, pglev, need } => {
                out.push(PacketKind::PullRq as u8);
                out.extend_from_slice(&rr.encode().to_be_bytes());
                out.push(*pglev);
                out.push(*need);
            }
            Packet::PullRp { rr, part, payload } => {
                out.push(PacketKind::PullRp as u8);
                out.extend_from_slice(&rr.encode().to_be_bytes());
                out.push(*part);
                out.extend_from_slice(payload);
            }
        }
        out
    }

    /// Decodes a payload body, dropping (returning `None`) anything
    /// malformed rather than faulting (§7 "Packet corruption / stray ->
    /// Drop silently").
    pub fn decode(data: &[u8]) -> Option<Packet> {
        let (&kind, rest) = data.split_first()?;
        match kind {
            k if k == PacketKind::MigrQ as u8 => {
                if rest.len() < 8 + 144 {
                    return None;
                }
                let home = Rr::decode(u32::from_be_bytes(rest[0..4].try_into().ok()?));
                let pdir = Rr::decode(u32::from_be_bytes(rest[4..8].try_into().ok()?));
                let state = decode_registers(&rest[8..])?;
                Some(Packet::MigrQ { home, pdir, state })
            }
            k if k == PacketKind::MigrP as u8 => {
                if rest.len() < 4 {
                    return None;
                }
                let home = Rr::decode(u32::from_be_bytes(rest[0..4].try_into().ok()?));
                Some(Packet::MigrP { home })
            }
            k if k == PacketKind::PullRq as u8 => {
                if rest.len() < 6 {
                    return None;
                }
                let rr = Rr::decode(u32::from_be_bytes(rest[0..4].try_into().ok()?));
                Some(Packet::PullRq {
                    rr,
                    pglev: rest[4],
                    need: rest[5],
                })
            }
            k if k == PacketKind::PullRp as u8 => {
                if rest.len() < 5 {
                    return None;
                }
                let rr = Rr::decode(u32::from_be_bytes(rest[0..4].try_into().ok()?));
                let part = rest[4];
                Some(Packet::PullRp {
                    rr,
                    part,
                    payload: rest[5..].to_vec(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PermBits;

    #[test]
    fn migrq_round_trips() {
        let home = Rr::new(1, 7, PermBits::empty());
        let pdir = Rr::new(1, 99, PermBits::empty());
        let mut state = Registers::default();
        state.rip = 0xdead_beef;
        let pkt = Packet::MigrQ { home, pdir, state };
        let bytes = pkt.encode();
        match Packet::decode(&bytes).unwrap() {
            Packet::MigrQ { home: h, pdir: p, state: s } => {
                assert_eq!(h, home);
                assert_eq!(p, pdir);
                assert_eq!(s.rip, 0xdead_beef);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn short_frame_is_dropped() {
        assert!(parse_frame(&[0u8; 4]).is_none());
        assert!(Packet::decode(&[PacketKind::PullRp as u8]).is_none());
    }

    #[test]
    fn pullrp_parts_cover_a_whole_page() {
        assert_eq!(PART_SIZES.iter().sum::<usize>(), crate::addr::PAGESIZE);
    }
}

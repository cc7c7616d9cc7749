#[cfg(test)]
mod packet_test;

use std::fmt;
use std::net::SocketAddrV4;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::addr::{get_addr, put_addr};
use crate::candidate::{encode_candidate_list, get_candidate_list, CandidateRecord};
use crate::coding::Reader;
use crate::error::{Error, Result};
use crate::peer_id::PeerId;
use crate::peer_info::PeerInfo;

/// Size of the fixed datagram header: type(1) + flags(1) + seq(2).
pub const HEADER_SIZE: usize = 4;

/// Largest DATA payload carried in a single datagram.
pub const MAX_DATA_PAYLOAD: usize = 1200;

/// Marks the last PEER_INFO of a batch, and the FIN close handshake.
pub const FLAG_FIN: u8 = 0x01;
/// Marks a ROUTE_PROBE reply.
pub const FLAG_RESPONSE: u8 = 0x02;
/// Set on REGISTER_ACK when the server offers datagram relaying.
pub const FLAG_RELAY_AVAILABLE: u8 = 0x04;

/// Discriminates every framed datagram.
///
/// Types occupy disjoint ranges: 0x00..=0x7F data plane,
/// 0x80..=0x9F stateful-signaling control, 0xA0..=0xBF relay plane.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum PacketType {
    #[serde(rename = "data")]
    Data = 0x01,
    #[serde(rename = "ack")]
    Ack = 0x02,
    #[serde(rename = "punch")]
    Punch = 0x03,
    #[serde(rename = "punch-ack")]
    PunchAck = 0x04,
    #[serde(rename = "route-probe")]
    RouteProbe = 0x05,
    #[serde(rename = "fin")]
    Fin = 0x06,

    #[serde(rename = "register")]
    Register = 0x80,
    #[serde(rename = "register-ack")]
    RegisterAck = 0x81,
    #[serde(rename = "alive")]
    Alive = 0x82,
    #[serde(rename = "alive-ack")]
    AliveAck = 0x83,
    #[serde(rename = "peer-info")]
    PeerInfo = 0x84,
    #[serde(rename = "peer-info-ack")]
    PeerInfoAck = 0x85,
    #[serde(rename = "nat-probe")]
    NatProbe = 0x86,
    #[serde(rename = "nat-probe-ack")]
    NatProbeAck = 0x87,
    #[serde(rename = "peer-off")]
    PeerOff = 0x88,

    #[serde(rename = "relay-data")]
    RelayData = 0xA0,
}

impl PacketType {
    pub fn is_data_plane(self) -> bool {
        (self as u8) < 0x80
    }

    pub fn is_signaling(self) -> bool {
        (0x80..0xA0).contains(&(self as u8))
    }

    pub fn is_relay(self) -> bool {
        (self as u8) >= 0xA0
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Punch => "PUNCH",
            Self::PunchAck => "PUNCH_ACK",
            Self::RouteProbe => "ROUTE_PROBE",
            Self::Fin => "FIN",
            Self::Register => "REGISTER",
            Self::RegisterAck => "REGISTER_ACK",
            Self::Alive => "ALIVE",
            Self::AliveAck => "ALIVE_ACK",
            Self::PeerInfo => "PEER_INFO",
            Self::PeerInfoAck => "PEER_INFO_ACK",
            Self::NatProbe => "NAT_PROBE",
            Self::NatProbeAck => "NAT_PROBE_ACK",
            Self::PeerOff => "PEER_OFF",
            Self::RelayData => "RELAY_DATA",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Ack),
            0x03 => Ok(Self::Punch),
            0x04 => Ok(Self::PunchAck),
            0x05 => Ok(Self::RouteProbe),
            0x06 => Ok(Self::Fin),
            0x80 => Ok(Self::Register),
            0x81 => Ok(Self::RegisterAck),
            0x82 => Ok(Self::Alive),
            0x83 => Ok(Self::AliveAck),
            0x84 => Ok(Self::PeerInfo),
            0x85 => Ok(Self::PeerInfoAck),
            0x86 => Ok(Self::NatProbe),
            0x87 => Ok(Self::NatProbeAck),
            0x88 => Ok(Self::PeerOff),
            0xA0 => Ok(Self::RelayData),
            other => Err(Error::ErrUnknownPacketType(other)),
        }
    }
}

/// Outcome of a REGISTER, as reported by the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterStatus {
    PeerOffline = 0,
    PeerOnline = 1,
    ErrorTableFull = 2,
    ErrorBadPeerId = 3,
}

impl TryFrom<u8> for RegisterStatus {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::PeerOffline),
            1 => Ok(Self::PeerOnline),
            2 => Ok(Self::ErrorTableFull),
            3 => Ok(Self::ErrorBadPeerId),
            other => Err(Error::ErrUnknownRegisterStatus(other)),
        }
    }
}

/// REGISTER body: the pair key, the controlling tie-breaker and the
/// candidates gathered so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub local_id: PeerId,
    pub remote_id: PeerId,
    pub tie_breaker: u64,
    pub candidates: Vec<CandidateRecord>,
}

/// REGISTER_ACK body. `mapped` is the endpoint the server observed the
/// REGISTER from, which doubles as a server-reflexive probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAck {
    pub status: RegisterStatus,
    /// Server-side candidate cache capacity; 0 means no caching.
    pub max_candidates: u8,
    pub session_id: u64,
    pub mapped: SocketAddrV4,
    /// Second UDP port for the NAT classification probe; 0 when absent.
    pub probe_port: u16,
}

/// A decoded type-specific body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Data(Bytes),
    Ack { ack_seq: u16, sack_bits: u32 },
    Punch,
    PunchAck,
    RouteProbe,
    Fin,
    Register(Register),
    RegisterAck(RegisterAck),
    Alive { session_id: u64 },
    AliveAck { session_id: u64 },
    PeerInfo(PeerInfo),
    PeerInfoAck { sender_id: PeerId, target_id: PeerId },
    NatProbe { tsx_id: u32 },
    NatProbeAck { mapped: SocketAddrV4, tsx_id: u32 },
    PeerOff { session_id: u64 },
    RelayData { session_id: u64, inner: Bytes },
}

impl Body {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Body::Data(_) => PacketType::Data,
            Body::Ack { .. } => PacketType::Ack,
            Body::Punch => PacketType::Punch,
            Body::PunchAck => PacketType::PunchAck,
            Body::RouteProbe => PacketType::RouteProbe,
            Body::Fin => PacketType::Fin,
            Body::Register(_) => PacketType::Register,
            Body::RegisterAck(_) => PacketType::RegisterAck,
            Body::Alive { .. } => PacketType::Alive,
            Body::AliveAck { .. } => PacketType::AliveAck,
            Body::PeerInfo(_) => PacketType::PeerInfo,
            Body::PeerInfoAck { .. } => PacketType::PeerInfoAck,
            Body::NatProbe { .. } => PacketType::NatProbe,
            Body::NatProbeAck { .. } => PacketType::NatProbeAck,
            Body::PeerOff { .. } => PacketType::PeerOff,
            Body::RelayData { .. } => PacketType::RelayData,
        }
    }
}

/// One framed datagram: the fixed header plus a typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub flags: u8,
    pub seq: u16,
    pub body: Body,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seq={} flags=0x{:02x}",
            self.packet_type(),
            self.seq,
            self.flags
        )
    }
}

impl Packet {
    pub fn new(body: Body) -> Self {
        Packet {
            flags: 0,
            seq: 0,
            body,
        }
    }

    pub fn with_seq(body: Body, seq: u16) -> Self {
        Packet {
            flags: 0,
            seq,
            body,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.body.packet_type()
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Encodes the packet into a fresh datagram.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
        buf.put_u8(self.packet_type() as u8);
        buf.put_u8(self.flags);
        buf.put_u16(self.seq);
        self.encode_body(&mut buf);
        buf.freeze()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match &self.body {
            Body::Data(payload) => buf.put_slice(payload),
            Body::Ack { ack_seq, sack_bits } => {
                buf.put_u16(*ack_seq);
                buf.put_u32(*sack_bits);
            }
            Body::Punch | Body::PunchAck | Body::RouteProbe | Body::Fin => {}
            Body::Register(reg) => {
                reg.local_id.put(buf);
                reg.remote_id.put(buf);
                buf.put_u64(reg.tie_breaker);
                encode_candidate_list(0, &reg.candidates, buf);
            }
            Body::RegisterAck(ack) => {
                buf.put_u8(ack.status as u8);
                buf.put_u8(ack.max_candidates);
                buf.put_u64(ack.session_id);
                put_addr(buf, &ack.mapped);
                buf.put_u16(ack.probe_port);
            }
            Body::Alive { session_id } | Body::AliveAck { session_id } => {
                buf.put_u64(*session_id);
            }
            Body::PeerInfo(info) => info.encode_into(buf),
            Body::PeerInfoAck {
                sender_id,
                target_id,
            } => {
                sender_id.put(buf);
                target_id.put(buf);
            }
            Body::NatProbe { tsx_id } => buf.put_u32(*tsx_id),
            Body::NatProbeAck { mapped, tsx_id } => {
                buf.put_u32(u32::from(*mapped.ip()));
                buf.put_u16(mapped.port());
                buf.put_u32(*tsx_id);
            }
            Body::PeerOff { session_id } => buf.put_u64(*session_id),
            Body::RelayData { session_id, inner } => {
                buf.put_u64(*session_id);
                buf.put_slice(inner);
            }
        }
    }

    /// Decodes one datagram. Trailing bytes beyond a fixed-size body are
    /// tolerated; every length and range violation is an error.
    pub fn decode(raw: &[u8]) -> Result<Packet> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::ErrPacketTooShort);
        }
        let typ = PacketType::try_from(raw[0])?;
        let flags = raw[1];
        let seq = u16::from_be_bytes([raw[2], raw[3]]);
        let mut r = Reader::new(&raw[HEADER_SIZE..]);

        let body = match typ {
            PacketType::Data => {
                let payload = r.rest();
                if payload.len() > MAX_DATA_PAYLOAD {
                    return Err(Error::ErrPayloadTooLarge);
                }
                Body::Data(Bytes::copy_from_slice(payload))
            }
            PacketType::Ack => Body::Ack {
                ack_seq: r.u16()?,
                sack_bits: r.u32()?,
            },
            PacketType::Punch => Body::Punch,
            PacketType::PunchAck => Body::PunchAck,
            PacketType::RouteProbe => Body::RouteProbe,
            PacketType::Fin => Body::Fin,
            PacketType::Register => {
                let local_id = PeerId::get(&mut r)?;
                let remote_id = PeerId::get(&mut r)?;
                let tie_breaker = r.u64()?;
                let (_base, candidates) = get_candidate_list(&mut r)?;
                Body::Register(Register {
                    local_id,
                    remote_id,
                    tie_breaker,
                    candidates,
                })
            }
            PacketType::RegisterAck => {
                let status = RegisterStatus::try_from(r.u8()?)?;
                let max_candidates = r.u8()?;
                let session_id = r.u64()?;
                let mapped = get_addr(&mut r)?;
                let probe_port = r.u16()?;
                Body::RegisterAck(RegisterAck {
                    status,
                    max_candidates,
                    session_id,
                    mapped,
                    probe_port,
                })
            }
            PacketType::Alive => Body::Alive {
                session_id: r.u64()?,
            },
            PacketType::AliveAck => Body::AliveAck {
                session_id: r.u64()?,
            },
            PacketType::PeerInfo => Body::PeerInfo(PeerInfo::decode(&mut r)?),
            PacketType::PeerInfoAck => Body::PeerInfoAck {
                sender_id: PeerId::get(&mut r)?,
                target_id: PeerId::get(&mut r)?,
            },
            PacketType::NatProbe => Body::NatProbe { tsx_id: r.u32()? },
            PacketType::NatProbeAck => {
                let ip = r.u32()?;
                let port = r.u16()?;
                let tsx_id = r.u32()?;
                Body::NatProbeAck {
                    mapped: SocketAddrV4::new(ip.into(), port),
                    tsx_id,
                }
            }
            PacketType::PeerOff => Body::PeerOff {
                session_id: r.u64()?,
            },
            PacketType::RelayData => {
                let session_id = r.u64()?;
                Body::RelayData {
                    session_id,
                    inner: Bytes::copy_from_slice(r.rest()),
                }
            }
        };

        Ok(Packet { flags, seq, body })
    }
}

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Packet kind as it appears on the wire: `0` = ACK, `1` = REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PacketKind {
    Ack,
    Request,
}

impl From<PacketKind> for u8 {
    fn from(kind: PacketKind) -> u8 {
        match kind {
            PacketKind::Ack => 0,
            PacketKind::Request => 1,
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = String;

    fn try_from(raw: u8) -> std::result::Result<Self, Self::Error> {
        match raw {
            0 => Ok(PacketKind::Ack),
            1 => Ok(PacketKind::Request),
            other => Err(format!("unknown packet kind {}", other)),
        }
    }
}

/// One datagram of the acknowledgment protocol.
///
/// A REQUEST carries an application payload under a per-peer sequence id;
/// an ACK echoes that id and carries no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub id: u64,
    pub kind: PacketKind,
    #[serde(default)]
    pub payload: Bytes,
}

impl Packet {
    pub fn request(id: u64, payload: Bytes) -> Self {
        Packet { id, kind: PacketKind::Request, payload }
    }

    pub fn ack(id: u64) -> Self {
        Packet { id, kind: PacketKind::Ack, payload: Bytes::new() }
    }

    pub fn to_json(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_json(datagram: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(datagram)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_numeric_on_the_wire() {
        let json = String::from_utf8(Packet::ack(7).to_json().unwrap().to_vec()).unwrap();
        assert!(json.contains("\"kind\":0"));
        assert!(json.contains("\"id\":7"));

        let json = String::from_utf8(
            Packet::request(1, Bytes::from_static(b"x")).to_json().unwrap().to_vec(),
        )
        .unwrap();
        assert!(json.contains("\"kind\":1"));
    }

    #[test]
    fn test_request_payload_survives_encoding() {
        let packet = Packet::request(42, Bytes::from_static(b"{\"co\":1.5}"));
        let decoded = Packet::from_json(&packet.to_json().unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_ack_without_payload_field_decodes() {
        let decoded = Packet::from_json(br#"{"id":3,"kind":0}"#).unwrap();
        assert_eq!(decoded, Packet::ack(3));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Packet::from_json(br#"{"id":3,"kind":9,"payload":[]}"#).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Packet::from_json(b"not a packet").is_err());
    }
}

//! The encrypted packet envelope.
//!
//! Binary fields travel as standard base64, the digest as lowercase hex.
//! The relay only ever reads `packet_id`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Serde helpers for base64 byte fields.
mod serde_b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(|_| serde::de::Error::custom("invalid base64"))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match bytes {
                Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let text: Option<String> = Option::deserialize(deserializer)?;
            text.map(|t| {
                STANDARD
                    .decode(t.as_bytes())
                    .map_err(|_| serde::de::Error::custom("invalid base64"))
            })
            .transpose()
        }
    }
}

/// A hybrid-encrypted message.
///
/// `enc_key` is the message key wrapped for the receiver; `enc_key_sender`
/// is the same key wrapped for the sender so sent history stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// 128 random bits, lowercase hex.
    pub packet_id: String,
    /// Message key wrapped for the receiver.
    #[serde(with = "serde_b64")]
    pub enc_key: Vec<u8>,
    /// Message key wrapped for the sender.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_b64::option"
    )]
    pub enc_key_sender: Option<Vec<u8>>,
    /// AEAD nonce.
    #[serde(with = "serde_b64")]
    pub nonce: Vec<u8>,
    /// Ciphertext with the tag appended.
    #[serde(with = "serde_b64")]
    pub ciphertext: Vec<u8>,
    /// Hex SHA-256 of `ciphertext`.
    pub sha256: String,
    /// Sender public key PEM.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_b64::option"
    )]
    pub sender_pub: Option<Vec<u8>>,
}

impl Packet {
    /// Serialize to the wire JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse wire JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Encoding(format!("bad packet: {}", e)))
    }

    /// Sender public key, if the packet carries one.
    pub fn sender_pem(&self) -> Option<&str> {
        self.sender_pub
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Read just the `packet_id` of a serialized packet.
pub fn peek_packet_id(json: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct IdOnly {
        packet_id: String,
    }
    let id: IdOnly = serde_json::from_str(json)
        .map_err(|e| Error::Protocol(format!("packet without id: {}", e)))?;
    Ok(id.packet_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet {
            packet_id: "00112233445566778899aabbccddeeff".into(),
            enc_key: vec![1, 2, 3],
            enc_key_sender: None,
            nonce: vec![0; 12],
            ciphertext: vec![0xff; 20],
            sha256: "ab".repeat(32),
            sender_pub: None,
        }
    }

    #[test]
    fn test_optional_fields_omitted() {
        let json = sample().to_json().expect("serialize");
        assert!(!json.contains("enc_key_sender"));
        assert!(!json.contains("sender_pub"));
        assert!(json.contains("\"enc_key\":\"AQID\""));
    }

    #[test]
    fn test_sender_pem() {
        let mut packet = sample();
        packet.sender_pub = Some(b"-----BEGIN PUBLIC KEY-----".to_vec());
        let parsed = Packet::from_json(&packet.to_json().expect("serialize")).expect("parse");
        assert_eq!(parsed.sender_pem(), Some("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let json = r#"{"packet_id":"x","enc_key":"!!","nonce":"","ciphertext":"","sha256":""}"#;
        assert!(matches!(Packet::from_json(json), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_peek_packet_id() {
        let json = sample().to_json().expect("serialize");
        assert_eq!(
            peek_packet_id(&json).expect("peek"),
            "00112233445566778899aabbccddeeff"
        );
        assert!(peek_packet_id("{}").is_err());
    }
}

//! Wire protocol
//!
//! Defines the messages exchanged between participants and their framing.
//!
//! # Protocol Design
//!
//! - Message bodies are serialized with bincode
//! - Each message is preceded by a fixed-size header with version, length and type
//! - Scene updates carry their actions as an opaque action block (see
//!   [`scenecast_ir::codec`]) so unknown opcodes can be skipped
//! - Resource announcements travel separately from scene updates

use scenecast_ir::{
    decode_actions, encode_actions, CodecError, DecodedActions, Flush, FlushKind, FlushMode,
    FlushTimeInformation, ParticipantId, SceneId, SceneSizeInfo, SceneVersionTag,
};
use scenecast_resource::{
    Resource, ResourceAvailability, ResourceCompression, ResourceError, ResourceHash, ResourceKind,
};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::registry::PublicationMode;

/// Protocol version for compatibility checks
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Message header for framing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Protocol version
    pub version: u32,
    /// Body length in bytes (excluding header)
    pub length: u32,
    /// [`MessageType`] discriminant for quick routing
    pub msg_type: u8,
}

impl MessageHeader {
    /// Header size in bytes
    pub const SIZE: usize = 9;

    /// Create a new header
    pub fn new(length: u32, msg_type: MessageType) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            length,
            msg_type: msg_type as u8,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        bincode::serialize(self).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        bincode::deserialize(bytes).map_err(|e| MessageError::Deserialization(e.to_string()))
    }
}

/// Message type discriminant for quick routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Hello = 1,

    // Scene availability and subscription
    ScenesAvailable = 2,
    ScenesUnavailable = 3,
    SubscribeScene = 4,
    UnsubscribeScene = 5,
    SceneUpdate = 6,
    RequestResync = 7,

    // Resource distribution
    ResourceAnnouncement = 16,
    ResourceRequest = 17,
    ResourceData = 18,
}

impl MessageType {
    /// Decode a raw discriminant
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::Hello,
            2 => Self::ScenesAvailable,
            3 => Self::ScenesUnavailable,
            4 => Self::SubscribeScene,
            5 => Self::UnsubscribeScene,
            6 => Self::SceneUpdate,
            7 => Self::RequestResync,
            16 => Self::ResourceAnnouncement,
            17 => Self::ResourceRequest,
            18 => Self::ResourceData,
            _ => return None,
        })
    }
}

/// A scene offered by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub scene_id: SceneId,
    pub name: String,
    pub mode: PublicationMode,
}

/// One flush (delta or snapshot) on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneUpdate {
    pub scene_id: SceneId,
    pub sequence: u64,
    pub kind: FlushKind,
    pub flush_mode: FlushMode,
    pub version_tag: Option<SceneVersionTag>,
    pub publication_mode: PublicationMode,
    pub time_info: FlushTimeInformation,
    pub counter_wrapped: bool,
    /// Wrap epoch of the provider's sequence counter
    pub epoch: u64,
    pub resources: Vec<ResourceHash>,
    pub size_info: SceneSizeInfo,
    /// Encoded action block
    pub actions: Vec<u8>,
}

impl SceneUpdate {
    /// Serialize a flush
    pub fn from_flush(flush: &Flush, publication_mode: PublicationMode) -> Result<Self, CodecError> {
        Ok(Self {
            scene_id: flush.scene_id,
            sequence: flush.sequence,
            kind: flush.kind,
            flush_mode: flush.mode,
            version_tag: flush.version_tag,
            publication_mode,
            time_info: flush.time_info,
            counter_wrapped: flush.counter_wrapped,
            epoch: flush.epoch,
            resources: flush.resources.clone(),
            size_info: flush.size_info.clone(),
            actions: encode_actions(&flush.actions)?,
        })
    }

    /// Decode the action block
    pub fn decode_actions(&self) -> Result<DecodedActions, CodecError> {
        decode_actions(&self.actions)
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == FlushKind::Snapshot
    }
}

/// Resource availability notice, independent of scene updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAnnouncement {
    pub hash: ResourceHash,
    pub size: u64,
    pub kind: ResourceKind,
    pub availability: ResourceAvailability,
}

/// Resource payload answering a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    pub hash: ResourceHash,
    pub kind: ResourceKind,
    pub name: String,
    pub compression: ResourceCompression,
    pub data: Vec<u8>,
}

impl ResourceData {
    /// Copy a resource onto the wire
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            hash: resource.hash(),
            kind: resource.kind(),
            name: resource.name().to_string(),
            compression: resource.compression(),
            data: resource.data().to_vec(),
        }
    }

    /// Rebuild the resource, verifying the announced hash
    pub fn into_resource(self) -> Result<Resource, ResourceError> {
        let expected = self.hash;
        let resource = Resource::with_compression(self.kind, self.name, self.compression, self.data);
        if resource.hash() != expected {
            return Err(ResourceError::HashMismatch {
                expected,
                actual: resource.hash(),
            });
        }
        Ok(resource)
    }
}

/// Messages exchanged between participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Connection handshake
    Hello {
        participant: ParticipantId,
        protocol_version: u32,
    },

    /// Provider offers scenes
    ScenesAvailable { scenes: Vec<SceneInfo> },

    /// Provider withdraws scenes
    ScenesUnavailable { scenes: Vec<SceneId> },

    /// Consumer asks for a scene's updates
    SubscribeScene { scene_id: SceneId },

    /// Consumer stops receiving a scene's updates
    UnsubscribeScene { scene_id: SceneId },

    /// A delta or snapshot flush
    SceneUpdate(SceneUpdate),

    /// Consumer lost sync and needs a fresh snapshot
    RequestResync { scene_id: SceneId },

    ResourceAnnouncement(ResourceAnnouncement),

    /// Consumer asks for resource payloads
    ResourceRequest { hashes: Vec<ResourceHash> },

    ResourceData(ResourceData),
}

impl Message {
    /// Get the type discriminant
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello { .. } => MessageType::Hello,
            Self::ScenesAvailable { .. } => MessageType::ScenesAvailable,
            Self::ScenesUnavailable { .. } => MessageType::ScenesUnavailable,
            Self::SubscribeScene { .. } => MessageType::SubscribeScene,
            Self::UnsubscribeScene { .. } => MessageType::UnsubscribeScene,
            Self::SceneUpdate(_) => MessageType::SceneUpdate,
            Self::RequestResync { .. } => MessageType::RequestResync,
            Self::ResourceAnnouncement(_) => MessageType::ResourceAnnouncement,
            Self::ResourceRequest { .. } => MessageType::ResourceRequest,
            Self::ResourceData(_) => MessageType::ResourceData,
        }
    }
}

/// Wire error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// IO error
    Io(String),
    /// Serialization error
    Serialization(String),
    /// Deserialization error
    Deserialization(String),
    /// Protocol version mismatch
    VersionMismatch { expected: u32, got: u32 },
    /// Message too large
    MessageTooLarge { size: usize, max: usize },
    /// Connection closed
    ConnectionClosed,
    /// Unknown or inconsistent message type
    InvalidMessageType(u8),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Deserialization(e) => write!(f, "Deserialization error: {}", e),
            Self::VersionMismatch { expected, got } => {
                write!(f, "Protocol version mismatch: expected {}, got {}", expected, got)
            }
            Self::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::InvalidMessageType(t) => write!(f, "Invalid message type: {}", t),
        }
    }
}

impl std::error::Error for MessageError {}

impl From<io::Error> for MessageError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(e.to_string())
        }
    }
}

/// Serialize a message with its header
pub fn encode_message(msg: &Message, max_size: usize) -> Result<Vec<u8>, MessageError> {
    let body = bincode::serialize(msg).map_err(|e| MessageError::Serialization(e.to_string()))?;

    if body.len() > max_size {
        return Err(MessageError::MessageTooLarge {
            size: body.len(),
            max: max_size,
        });
    }

    let header = MessageHeader::new(body.len() as u32, msg.message_type());
    let mut bytes = header.to_bytes()?;
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

fn check_header(header: &MessageHeader, max_size: usize) -> Result<MessageType, MessageError> {
    if header.version != PROTOCOL_VERSION {
        return Err(MessageError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: header.version,
        });
    }

    if header.length as usize > max_size {
        return Err(MessageError::MessageTooLarge {
            size: header.length as usize,
            max: max_size,
        });
    }

    MessageType::from_u8(header.msg_type).ok_or(MessageError::InvalidMessageType(header.msg_type))
}

fn decode_body(msg_type: MessageType, body: &[u8]) -> Result<Message, MessageError> {
    let msg: Message =
        bincode::deserialize(body).map_err(|e| MessageError::Deserialization(e.to_string()))?;
    if msg.message_type() != msg_type {
        return Err(MessageError::InvalidMessageType(msg_type as u8));
    }
    Ok(msg)
}

/// Parse one framed message from a complete buffer
pub fn decode_message(bytes: &[u8], max_size: usize) -> Result<Message, MessageError> {
    if bytes.len() < MessageHeader::SIZE {
        return Err(MessageError::ConnectionClosed);
    }
    let header = MessageHeader::from_bytes(&bytes[..MessageHeader::SIZE])?;
    let msg_type = check_header(&header, max_size)?;

    let body = &bytes[MessageHeader::SIZE..];
    if body.len() != header.length as usize {
        return Err(MessageError::Deserialization(format!(
            "body is {} bytes, header says {}",
            body.len(),
            header.length
        )));
    }
    decode_body(msg_type, body)
}

/// Write a message to a stream
pub fn write_message<W: Write>(writer: &mut W, msg: &Message, max_size: usize) -> Result<(), MessageError> {
    let bytes = encode_message(msg, max_size)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a message from a stream
pub fn read_message<R: Read>(reader: &mut R, max_size: usize) -> Result<Message, MessageError> {
    let mut header_buf = [0u8; MessageHeader::SIZE];
    reader.read_exact(&mut header_buf)?;

    let header = MessageHeader::from_bytes(&header_buf)?;
    let msg_type = check_header(&header, max_size)?;

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body)?;

    decode_body(msg_type, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenecast_ir::{ObjectHandle, SceneAction};
    use std::sync::Arc;

    #[test]
    fn test_header_size_is_fixed() {
        let header = MessageHeader::new(u32::MAX, MessageType::ResourceData);
        assert_eq!(header.to_bytes().unwrap().len(), MessageHeader::SIZE);
        let header = MessageHeader::new(0, MessageType::Hello);
        assert_eq!(header.to_bytes().unwrap().len(), MessageHeader::SIZE);
    }

    #[test]
    fn test_stream_roundtrip() {
        let messages = vec![
            Message::SubscribeScene { scene_id: SceneId::new(4) },
            Message::ResourceRequest { hashes: vec![ResourceHash::new(1, 2)] },
        ];

        let mut buffer = Vec::new();
        for msg in &messages {
            write_message(&mut buffer, msg, MAX_MESSAGE_SIZE).unwrap();
        }

        let mut cursor = std::io::Cursor::new(buffer);
        for expected in &messages {
            assert_eq!(&read_message(&mut cursor, MAX_MESSAGE_SIZE).unwrap(), expected);
        }
        assert_eq!(
            read_message(&mut cursor, MAX_MESSAGE_SIZE),
            Err(MessageError::ConnectionClosed)
        );
    }

    #[test]
    fn test_scene_update_from_flush() {
        let actions: Arc<[SceneAction]> = vec![SceneAction::AllocateNode {
            handle: ObjectHandle::from_raw(1),
            name: "n".into(),
        }]
        .into();
        let flush = Flush {
            scene_id: SceneId::new(2),
            sequence: 5,
            kind: FlushKind::Delta,
            mode: FlushMode::Immediate,
            version_tag: Some(SceneVersionTag::new(8)),
            time_info: FlushTimeInformation::default(),
            actions: Arc::clone(&actions),
            resources: Vec::new(),
            size_info: SceneSizeInfo::default(),
            counter_wrapped: false,
            epoch: 2,
        };

        let update = SceneUpdate::from_flush(&flush, PublicationMode::LocalAndRemote).unwrap();
        let bytes = encode_message(&Message::SceneUpdate(update), MAX_MESSAGE_SIZE).unwrap();
        match decode_message(&bytes, MAX_MESSAGE_SIZE).unwrap() {
            Message::SceneUpdate(update) => {
                assert_eq!(update.sequence, 5);
                assert_eq!(update.epoch, 2);
                assert_eq!(update.version_tag, Some(SceneVersionTag::new(8)));
                assert_eq!(update.decode_actions().unwrap().actions, actions.to_vec());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_rejects_oversized_and_bad_version() {
        let msg = Message::ResourceRequest {
            hashes: vec![ResourceHash::new(1, 1); 100],
        };
        assert!(matches!(
            encode_message(&msg, 64),
            Err(MessageError::MessageTooLarge { max: 64, .. })
        ));

        let mut bytes = encode_message(&msg, MAX_MESSAGE_SIZE).unwrap();
        bytes[0] = 99;
        assert!(matches!(
            decode_message(&bytes, MAX_MESSAGE_SIZE),
            Err(MessageError::VersionMismatch { got: 99, .. })
        ));
    }

    #[test]
    fn test_type_mismatch_detected() {
        let mut bytes =
            encode_message(&Message::UnsubscribeScene { scene_id: SceneId::new(1) }, MAX_MESSAGE_SIZE)
                .unwrap();
        bytes[8] = MessageType::SubscribeScene as u8;
        assert_eq!(
            decode_message(&bytes, MAX_MESSAGE_SIZE),
            Err(MessageError::InvalidMessageType(MessageType::SubscribeScene as u8))
        );
    }

    #[test]
    fn test_resource_data_hash_verified() {
        let resource = Resource::new(ResourceKind::Texture2D, "t", vec![1u8, 2, 3]);
        let data = ResourceData::from_resource(&resource);
        assert_eq!(data.clone().into_resource().unwrap().hash(), resource.hash());

        let mut tampered = data;
        tampered.data[0] = 9;
        assert!(matches!(
            tampered.into_resource(),
            Err(ResourceError::HashMismatch { .. })
        ));
    }
}

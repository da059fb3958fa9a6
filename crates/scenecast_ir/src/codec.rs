//! Binary action codec
//!
//! An action block is a small header followed by one record per action:
//!
//! ```text
//! ┌─────────────┬────────────┐
//! │ version u16 │ count u32  │   header, little endian
//! ├─────────────┼────────────┼──────────────────┐
//! │ opcode u16  │ length u32 │ payload (length) │   × count
//! └─────────────┴────────────┴──────────────────┘
//! ```
//!
//! Payloads are bincode. A record with an opcode this build does not know
//! is skipped using its length, so newer producers can talk to older
//! consumers.

use crate::action::{ActionOpcode, SceneAction};
use crate::error::CodecError;

/// Version of the action block layout
pub const ACTION_FORMAT_VERSION: u16 = 1;

const HEADER_SIZE: usize = 6;
const RECORD_HEADER_SIZE: usize = 6;

/// Actions decoded from a block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedActions {
    pub actions: Vec<SceneAction>,
    /// Records skipped because of unknown opcodes
    pub skipped: usize,
}

/// Encode actions into a block
pub fn encode_actions(actions: &[SceneAction]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(HEADER_SIZE + actions.len() * (RECORD_HEADER_SIZE + 32));
    out.extend_from_slice(&ACTION_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(actions.len() as u32).to_le_bytes());

    for action in actions {
        let payload =
            bincode::serialize(action).map_err(|e| CodecError::Serialization(e.to_string()))?;
        write_record(&mut out, action.opcode() as u16, &payload);
    }

    Ok(out)
}

/// Append one raw record. Exposed for forward-compatibility tests and tools.
pub fn write_record(out: &mut Vec<u8>, opcode: u16, payload: &[u8]) {
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Decode a block, skipping unknown opcodes
pub fn decode_actions(bytes: &[u8]) -> Result<DecodedActions, CodecError> {
    let mut reader = Reader { bytes, pos: 0 };

    let version = reader.u16()?;
    if version != ACTION_FORMAT_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: ACTION_FORMAT_VERSION,
            got: version,
        });
    }
    let count = reader.u32()?;

    let mut decoded = DecodedActions {
        actions: Vec::with_capacity(count.min(4096) as usize),
        skipped: 0,
    };

    for _ in 0..count {
        let raw_opcode = reader.u16()?;
        let length = reader.u32()? as usize;
        let payload = reader.take(length)?;

        match ActionOpcode::from_u16(raw_opcode) {
            Some(opcode) => {
                let action: SceneAction = bincode::deserialize(payload)
                    .map_err(|e| CodecError::Deserialization(e.to_string()))?;
                if action.opcode() != opcode {
                    return Err(CodecError::OpcodeMismatch(raw_opcode));
                }
                decoded.actions.push(action);
            }
            None => {
                log::debug!("Skipping unknown action opcode {} ({} bytes)", raw_opcode, length);
                decoded.skipped += 1;
            }
        }
    }

    let trailing = bytes.len() - reader.pos;
    if trailing != 0 {
        return Err(CodecError::TrailingBytes(trailing));
    }

    Ok(decoded)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodecError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ObjectHandle;

    fn sample() -> Vec<SceneAction> {
        vec![
            SceneAction::AllocateNode {
                handle: ObjectHandle::from_raw(1),
                name: "root".into(),
            },
            SceneAction::SetTranslation {
                node: ObjectHandle::from_raw(1),
                value: [1.0, 2.0, 3.0],
            },
        ]
    }

    #[test]
    fn test_encode_decode() {
        let bytes = encode_actions(&sample()).unwrap();
        let decoded = decode_actions(&bytes).unwrap();
        assert_eq!(decoded.actions, sample());
        assert_eq!(decoded.skipped, 0);
    }

    #[test]
    fn test_unknown_opcode_is_skipped() {
        let actions = sample();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ACTION_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        write_record(&mut bytes, actions[0].opcode() as u16, &bincode::serialize(&actions[0]).unwrap());
        write_record(&mut bytes, 0xBEEF, &[1, 2, 3, 4, 5]);
        write_record(&mut bytes, actions[1].opcode() as u16, &bincode::serialize(&actions[1]).unwrap());

        let decoded = decode_actions(&bytes).unwrap();
        assert_eq!(decoded.actions, actions);
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = encode_actions(&sample()).unwrap();
        bytes[0] = 9;
        assert!(matches!(
            decode_actions(&bytes),
            Err(CodecError::VersionMismatch { got: 9, .. })
        ));
    }

    #[test]
    fn test_truncated_block() {
        let bytes = encode_actions(&sample()).unwrap();
        assert!(matches!(
            decode_actions(&bytes[..bytes.len() - 1]),
            Err(CodecError::Truncated(_))
        ));
        assert!(matches!(decode_actions(&[1]), Err(CodecError::Truncated(0))));
    }

    #[test]
    fn test_opcode_payload_mismatch() {
        let actions = sample();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ACTION_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        write_record(
            &mut bytes,
            ActionOpcode::ReleaseHandle as u16,
            &bincode::serialize(&actions[0]).unwrap(),
        );
        assert_eq!(
            decode_actions(&bytes),
            Err(CodecError::OpcodeMismatch(ActionOpcode::ReleaseHandle as u16))
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_actions(&sample()).unwrap();
        bytes.push(0);
        assert_eq!(decode_actions(&bytes), Err(CodecError::TrailingBytes(1)));
    }
}

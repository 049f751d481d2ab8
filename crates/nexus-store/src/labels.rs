//! Node label field encoding
//!
//! A node stores its labels in a 40-bit field. When bit 39 is set the low 36
//! bits point at the first record of a chain in the node-labels array store;
//! that chain holds `[node_id, label, ...]` as big-endian `u64`s. Otherwise
//! bits 36-38 hold the label count and the 36 low bits are split evenly
//! between the labels (`36 / count` bits each).

use crate::{Error, Result};

/// Label field of a node without labels
pub const NO_LABELS_FIELD: u64 = 0;

const DYNAMIC_FLAG: u64 = 1 << 39;
const COUNT_SHIFT: u32 = 36;
const COUNT_MASK: u64 = 0x7;
const PAYLOAD_BITS: u32 = 36;
const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;
const MAX_INLINE_LABELS: usize = 7;

/// Decoded label field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelField {
    /// Labels stored in the field itself
    Inline(Vec<u32>),
    /// First record of the dynamic label chain
    Dynamic(u64),
}

/// Decode a 40-bit label field
pub fn parse_label_field(field: u64) -> LabelField {
    if field & DYNAMIC_FLAG != 0 {
        return LabelField::Dynamic(field & PAYLOAD_MASK);
    }
    let count = ((field >> COUNT_SHIFT) & COUNT_MASK) as u32;
    if count == 0 {
        return LabelField::Inline(Vec::new());
    }
    let bits = PAYLOAD_BITS / count;
    let mask = (1u64 << bits) - 1;
    let labels = (0..count)
        .map(|i| ((field >> (i * bits)) & mask) as u32)
        .collect();
    LabelField::Inline(labels)
}

/// Pack sorted labels into an inline field, `None` if they do not fit
pub fn inline_field(labels: &[u32]) -> Option<u64> {
    if labels.is_empty() {
        return Some(NO_LABELS_FIELD);
    }
    if labels.len() > MAX_INLINE_LABELS {
        return None;
    }
    let bits = PAYLOAD_BITS / labels.len() as u32;
    let mut field = (labels.len() as u64) << COUNT_SHIFT;
    for (i, label) in labels.iter().enumerate() {
        let label = *label as u64;
        if label >> bits != 0 {
            return None;
        }
        field |= label << (i as u32 * bits);
    }
    Some(field)
}

/// Label field pointing at a dynamic chain
pub fn dynamic_field(first_record: u64) -> Result<u64> {
    if first_record & !PAYLOAD_MASK != 0 {
        return Err(Error::internal(format!(
            "label record id {} exceeds 36 bits",
            first_record
        )));
    }
    Ok(DYNAMIC_FLAG | first_record)
}

/// Serialize the payload of a dynamic label chain
pub fn labels_to_bytes(node_id: u64, labels: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity((labels.len() + 1) * 8);
    out.extend_from_slice(&node_id.to_be_bytes());
    for label in labels {
        out.extend_from_slice(&(*label as u64).to_be_bytes());
    }
    out
}

/// Parse the payload of a dynamic label chain into `(node_id, labels)`
pub fn labels_from_bytes(bytes: &[u8]) -> Result<(u64, Vec<u32>)> {
    if bytes.len() < 8 || bytes.len() % 8 != 0 {
        return Err(Error::internal(format!(
            "label array of {} bytes is not a list of u64",
            bytes.len()
        )));
    }
    let mut words = bytes
        .chunks_exact(8)
        .map(|c| u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]));
    let node_id = words.next().unwrap_or_default();
    let labels = words.map(|w| w as u32).collect();
    Ok((node_id, labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(inline_field(&[]), Some(NO_LABELS_FIELD));
        assert_eq!(parse_label_field(0), LabelField::Inline(vec![]));
    }

    #[test]
    fn test_inline_round_trip() {
        for labels in [vec![5], vec![1, 2], vec![0, 3, 4000], vec![1, 2, 3, 4, 5, 6, 7]] {
            let field = inline_field(&labels).unwrap();
            assert!(field >> 40 == 0);
            assert_eq!(parse_label_field(field), LabelField::Inline(labels));
        }
    }

    #[test]
    fn test_inline_limits() {
        // one label gets all 36 bits
        let big = (1u32 << 31) + 7;
        assert!(inline_field(&[big]).is_some());
        // two labels get 18 bits each
        assert!(inline_field(&[1, 1 << 18]).is_none());
        assert!(inline_field(&[1, (1 << 18) - 1]).is_some());
        assert!(inline_field(&[0; 8]).is_none());
    }

    #[test]
    fn test_dynamic() {
        let field = dynamic_field(0xF_1234_5678).unwrap();
        assert_eq!(parse_label_field(field), LabelField::Dynamic(0xF_1234_5678));
        assert!(dynamic_field(1 << 36).is_err());
    }

    #[test]
    fn test_label_bytes() {
        let bytes = labels_to_bytes(42, &[1, 9, 100]);
        assert_eq!(bytes.len(), 32);
        assert_eq!(labels_from_bytes(&bytes).unwrap(), (42, vec![1, 9, 100]));
        assert!(labels_from_bytes(&bytes[..7]).is_err());
    }
}

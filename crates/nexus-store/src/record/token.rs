//! Token records
//!
//! Label and relationship type tokens are 5 bytes (`u8` in use, `u32` name
//! record). Property key tokens are 9 bytes and carry a property count
//! between the two. Names live in a dynamic string store.

use super::{
    check_len, check_pointer, finish_load, long_from_int_and_mod, low_bits, LoadMode, Record,
    RecordFormat, IN_USE,
};
use crate::Result;
use bytes::{Buf, BufMut};

/// What a token names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Node label
    Label,
    /// Relationship type
    RelationshipType,
    /// Property key
    PropertyKey,
}

impl TokenKind {
    /// Type descriptor of the token store
    pub fn type_descriptor(self) -> &'static str {
        match self {
            Self::Label => "LabelTokenStore",
            Self::RelationshipType => "RelationshipTypeTokenStore",
            Self::PropertyKey => "PropertyKeyTokenStore",
        }
    }

    /// Type descriptor of the dynamic store holding the token names
    pub fn name_store_descriptor(self) -> &'static str {
        match self {
            Self::Label => "LabelTokenStore.names",
            Self::RelationshipType => "RelationshipTypeTokenStore.names",
            Self::PropertyKey => "PropertyKeyTokenStore.keys",
        }
    }

    /// Record size in bytes
    pub fn record_size(self) -> usize {
        match self {
            Self::PropertyKey => 9,
            Self::Label | Self::RelationshipType => 5,
        }
    }
}

/// Token record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Token id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// First record of the name chain
    pub name_id: i64,
    /// Properties using this key (property key tokens only)
    pub property_count: u32,
}

impl TokenRecord {
    /// Create an in-use token pointing at its name chain
    pub fn new(id: u64, name_id: i64) -> Self {
        Self {
            id,
            in_use: true,
            name_id,
            property_count: 0,
        }
    }
}

impl Record for TokenRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }
}

/// Codec for [`TokenRecord`]
#[derive(Debug, Clone, Copy)]
pub struct TokenRecordFormat {
    kind: TokenKind,
}

impl TokenRecordFormat {
    /// Format for one token kind
    pub fn new(kind: TokenKind) -> Self {
        Self { kind }
    }

    /// Token kind
    pub fn kind(&self) -> TokenKind {
        self.kind
    }
}

impl RecordFormat for TokenRecordFormat {
    type Record = TokenRecord;

    fn type_descriptor(&self) -> &'static str {
        self.kind.type_descriptor()
    }

    fn record_size(&self) -> usize {
        self.kind.record_size()
    }

    fn is_in_use(&self, bytes: &[u8]) -> bool {
        bytes.first().is_some_and(|b| b & IN_USE != 0)
    }

    fn decode(&self, id: u64, bytes: &[u8], mode: LoadMode) -> Result<Option<TokenRecord>> {
        let store = self.type_descriptor();
        check_len(store, id, bytes.len(), self.record_size())?;
        let mut buf = bytes;

        let in_use = buf.get_u8() & IN_USE != 0;
        let property_count = match self.kind {
            TokenKind::PropertyKey => buf.get_u32(),
            _ => 0,
        };
        let name_id = long_from_int_and_mod(buf.get_u32(), 0);

        let record = TokenRecord {
            id,
            in_use,
            name_id,
            property_count,
        };
        finish_load(store, record, mode)
    }

    fn encode(&self, record: &TokenRecord, bytes: &mut [u8]) -> Result<()> {
        let store = self.type_descriptor();
        check_len(store, record.id, bytes.len(), self.record_size())?;
        if !record.in_use {
            bytes[0] = 0;
            return Ok(());
        }
        check_pointer(store, record.id, "name_id", record.name_id, 32)?;

        let mut out = bytes;
        out.put_u8(IN_USE);
        if self.kind == TokenKind::PropertyKey {
            out.put_u32(record.property_count);
        }
        out.put_u32(low_bits(record.name_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_token_layout() {
        let format = TokenRecordFormat::new(TokenKind::Label);
        let mut buf = vec![0; 5];
        format.encode(&TokenRecord::new(3, 17), &mut buf).unwrap();
        assert_eq!(buf, vec![1, 0, 0, 0, 17]);
        let decoded = format.decode(3, &buf, LoadMode::Normal).unwrap().unwrap();
        assert_eq!(decoded.name_id, 17);
    }

    #[test]
    fn test_property_key_token_round_trip() {
        let format = TokenRecordFormat::new(TokenKind::PropertyKey);
        let mut token = TokenRecord::new(8, 1234);
        token.property_count = 99;
        let mut buf = vec![0; format.record_size()];
        format.encode(&token, &mut buf).unwrap();
        assert_eq!(buf.len(), 9);
        assert_eq!(
            format.decode(8, &buf, LoadMode::Normal).unwrap().unwrap(),
            token
        );
    }

    #[test]
    fn test_unused_token() {
        let format = TokenRecordFormat::new(TokenKind::RelationshipType);
        let buf = vec![0; 5];
        assert!(format.decode(0, &buf, LoadMode::Check).unwrap().is_none());
        assert!(format.decode(0, &buf, LoadMode::Normal).is_err());
    }
}

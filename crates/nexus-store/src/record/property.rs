//! Property records (41 bytes)
//!
//! ```text
//! byte  0      modifiers: high nibble prev_prop[32..36], low nibble next_prop[32..36]
//! bytes 1-4    prev_prop low word
//! bytes 5-8    next_prop low word
//! bytes 9-40   payload: four u64 words holding property blocks
//! ```
//!
//! A property block takes 1-4 words. Its first word is the block header:
//!
//! ```text
//! bits  0-23   property key token id
//! bits 24-27   property type
//! bits 28-63   inline value (36 bits)
//! ```
//!
//! The payload is scanned until it is exhausted or a word with no type bits
//! is found. A record is in use iff it carries at least one block.

use super::{
    check_len, check_pointer, finish_load, high_bits, long_from_int_and_mod, low_bits,
    DynamicRecord, LoadMode, Record, RecordFormat, NO_NEXT_PROPERTY, NO_PREV_RECORD,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut};

/// Type descriptor of the property store
pub const PROPERTY_STORE: &str = "PropertyStore";

/// Words in a property record payload
pub const PAYLOAD_WORDS: usize = 4;

/// Payload size in bytes
pub const PAYLOAD_SIZE: usize = PAYLOAD_WORDS * 8;

/// Property record size in bytes
pub const PROPERTY_RECORD_SIZE: usize = 1 + 4 + 4 + PAYLOAD_SIZE;

/// Largest property key token id
pub const MAX_KEY_INDEX: u32 = 0xFF_FFFF;

const TYPE_MASK: u64 = 0x0F00_0000;
const KEY_MASK: u64 = 0x00FF_FFFF;
const INLINE_LONG_FLAG: u64 = 1 << 28;

/// Property value types stored in the block header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyType {
    /// Boolean
    Bool = 1,
    /// Signed 8-bit integer
    Byte = 2,
    /// Signed 16-bit integer
    Short = 3,
    /// Unicode scalar value
    Char = 4,
    /// Signed 32-bit integer
    Int = 5,
    /// Signed 64-bit integer
    Long = 6,
    /// 32-bit float
    Float = 7,
    /// 64-bit float
    Double = 8,
    /// UTF-8 string in the string dynamic store
    String = 9,
    /// Typed array in the array dynamic store
    Array = 10,
}

impl PropertyType {
    /// Look up a type by its id
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => Self::Bool,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Char,
            5 => Self::Int,
            6 => Self::Long,
            7 => Self::Float,
            8 => Self::Double,
            9 => Self::String,
            10 => Self::Array,
            _ => return None,
        })
    }

    /// Raw type bits of a block header (0 means unused)
    pub fn type_bits(header: u64) -> u8 {
        ((header & TYPE_MASK) >> 24) as u8
    }

    /// Number of payload words a block with this header occupies
    pub fn words_used(self, header: u64) -> usize {
        match self {
            Self::Long if header & INLINE_LONG_FLAG == 0 => 2,
            Self::Double => 2,
            _ => 1,
        }
    }

    /// Whether values of this type live in a dynamic store
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::String | Self::Array)
    }
}

/// A property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean
    Bool(bool),
    /// Signed 8-bit integer
    Byte(i8),
    /// Signed 16-bit integer
    Short(i16),
    /// Unicode scalar value
    Char(char),
    /// Signed 32-bit integer
    Int(i32),
    /// Signed 64-bit integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// String
    String(String),
    /// Byte array
    ByteArray(Vec<u8>),
    /// Int array
    IntArray(Vec<i32>),
    /// Long array
    LongArray(Vec<i64>),
    /// Double array
    DoubleArray(Vec<f64>),
}

impl PropertyValue {
    /// Header type this value is stored under
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Bool(_) => PropertyType::Bool,
            Self::Byte(_) => PropertyType::Byte,
            Self::Short(_) => PropertyType::Short,
            Self::Char(_) => PropertyType::Char,
            Self::Int(_) => PropertyType::Int,
            Self::Long(_) => PropertyType::Long,
            Self::Float(_) => PropertyType::Float,
            Self::Double(_) => PropertyType::Double,
            Self::String(_) => PropertyType::String,
            Self::ByteArray(_) | Self::IntArray(_) | Self::LongArray(_) | Self::DoubleArray(_) => {
                PropertyType::Array
            }
        }
    }
}

/// One property inside a property record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBlock {
    /// Raw payload words; the first one is the header
    pub value_blocks: Vec<u64>,
    /// Dynamic records holding a string or array value, loaded on demand
    pub value_records: Vec<DynamicRecord>,
}

impl PropertyBlock {
    fn key_and_type(key: u32, ty: PropertyType) -> Result<u64> {
        if key > MAX_KEY_INDEX {
            return Err(Error::invalid_property(format!(
                "property key {} exceeds {}",
                key, MAX_KEY_INDEX
            )));
        }
        Ok(key as u64 | ((ty as u64) << 24))
    }

    /// Encode a value that fits into the record itself
    ///
    /// Returns `None` for strings and arrays, which need a dynamic chain.
    pub fn inline(key: u32, value: &PropertyValue) -> Result<Option<Self>> {
        let header = Self::key_and_type(key, value.property_type())?;
        let words = match value {
            PropertyValue::Bool(v) => vec![header | ((*v as u64) << 28)],
            PropertyValue::Byte(v) => vec![header | ((*v as u8 as u64) << 28)],
            PropertyValue::Short(v) => vec![header | ((*v as u16 as u64) << 28)],
            PropertyValue::Char(v) => vec![header | ((*v as u32 as u64) << 28)],
            PropertyValue::Int(v) => vec![header | ((*v as u32 as u64) << 28)],
            PropertyValue::Float(v) => vec![header | ((v.to_bits() as u64) << 28)],
            PropertyValue::Long(v) => {
                if (0..1i64 << 35).contains(v) {
                    vec![header | INLINE_LONG_FLAG | ((*v as u64) << 29)]
                } else {
                    vec![header, *v as u64]
                }
            }
            PropertyValue::Double(v) => vec![header, v.to_bits()],
            _ => return Ok(None),
        };
        Ok(Some(Self {
            value_blocks: words,
            value_records: Vec::new(),
        }))
    }

    /// Block pointing at the first record of a dynamic chain
    pub fn dynamic(key: u32, ty: PropertyType, first_record: u64) -> Result<Self> {
        if first_record >> 36 != 0 {
            return Err(Error::invalid_property(format!(
                "dynamic record id {} exceeds 36 bits",
                first_record
            )));
        }
        Ok(Self {
            value_blocks: vec![Self::key_and_type(key, ty)? | (first_record << 28)],
            value_records: Vec::new(),
        })
    }

    /// Header word
    pub fn header(&self) -> u64 {
        self.value_blocks.first().copied().unwrap_or(0)
    }

    /// Property key token id
    pub fn key_index(&self) -> u32 {
        (self.header() & KEY_MASK) as u32
    }

    /// Property type, `None` when the header carries unknown type bits
    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::from_id(PropertyType::type_bits(self.header()))
    }

    /// The 36 inline value bits of the header
    pub fn single_value_long(&self) -> u64 {
        self.header() >> 28
    }

    /// Size of this block in bytes
    pub fn size(&self) -> usize {
        self.value_blocks.len() * 8
    }

    /// Decode an inline value; `None` for strings and arrays
    pub fn inline_value(&self) -> Result<Option<PropertyValue>> {
        let ty = self.property_type().ok_or_else(|| {
            Error::invalid_property(format!("unknown property type in header {:#x}", self.header()))
        })?;
        let bits = self.single_value_long();
        let value = match ty {
            PropertyType::Bool => PropertyValue::Bool(bits & 0x1 != 0),
            PropertyType::Byte => PropertyValue::Byte(bits as u8 as i8),
            PropertyType::Short => PropertyValue::Short(bits as u16 as i16),
            PropertyType::Char => {
                let c = char::from_u32(bits as u32).ok_or_else(|| {
                    Error::invalid_property(format!("invalid char value {:#x}", bits))
                })?;
                PropertyValue::Char(c)
            }
            PropertyType::Int => PropertyValue::Int(bits as u32 as i32),
            PropertyType::Float => PropertyValue::Float(f32::from_bits(bits as u32)),
            PropertyType::Long => {
                if self.header() & INLINE_LONG_FLAG != 0 {
                    PropertyValue::Long((self.header() >> 29) as i64)
                } else {
                    PropertyValue::Long(self.second_word()? as i64)
                }
            }
            PropertyType::Double => PropertyValue::Double(f64::from_bits(self.second_word()?)),
            PropertyType::String | PropertyType::Array => return Ok(None),
        };
        Ok(Some(value))
    }

    fn second_word(&self) -> Result<u64> {
        self.value_blocks
            .get(1)
            .copied()
            .ok_or_else(|| Error::invalid_property("two-word property block has one word"))
    }
}

/// Property record
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    /// Record id
    pub id: u64,
    /// In-use flag; on disk this is implied by the presence of blocks
    pub in_use: bool,
    /// Previous record in the owner's property chain
    pub prev_prop: i64,
    /// Next record in the owner's property chain
    pub next_prop: i64,
    /// Blocks in payload order
    pub blocks: Vec<PropertyBlock>,
    /// Removed blocks whose dynamic records are released on update
    pub deleted_blocks: Vec<PropertyBlock>,
}

impl PropertyRecord {
    /// Create an empty in-use property record
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            prev_prop: NO_PREV_RECORD,
            next_prop: NO_NEXT_PROPERTY,
            blocks: Vec::new(),
            deleted_blocks: Vec::new(),
        }
    }

    /// Bytes of payload taken by blocks
    pub fn used_payload(&self) -> usize {
        self.blocks.iter().map(PropertyBlock::size).sum()
    }

    /// Whether `block` still fits in the payload
    pub fn has_space_for(&self, block: &PropertyBlock) -> bool {
        self.used_payload() + block.size() <= PAYLOAD_SIZE
    }

    /// Find the block for a property key
    pub fn block(&self, key: u32) -> Option<&PropertyBlock> {
        self.blocks.iter().find(|b| b.key_index() == key)
    }

    /// Append a block
    pub fn add_block(&mut self, block: PropertyBlock) -> Result<()> {
        if !self.has_space_for(&block) {
            return Err(Error::invalid_property(format!(
                "property record {} has {} free bytes, block needs {}",
                self.id,
                PAYLOAD_SIZE - self.used_payload(),
                block.size()
            )));
        }
        self.blocks.push(block);
        self.in_use = true;
        Ok(())
    }

    /// Remove and return the block for a property key
    pub fn remove_block(&mut self, key: u32) -> Option<PropertyBlock> {
        let pos = self.blocks.iter().position(|b| b.key_index() == key)?;
        Some(self.blocks.remove(pos))
    }
}

impl Record for PropertyRecord {
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

/// Codec for [`PropertyRecord`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyRecordFormat;

impl RecordFormat for PropertyRecordFormat {
    type Record = PropertyRecord;

    fn type_descriptor(&self) -> &'static str {
        PROPERTY_STORE
    }

    fn record_size(&self) -> usize {
        PROPERTY_RECORD_SIZE
    }

    fn is_in_use(&self, bytes: &[u8]) -> bool {
        if bytes.len() < PROPERTY_RECORD_SIZE {
            return false;
        }
        let mut header = &bytes[9..17];
        PropertyType::type_bits(header.get_u64()) != 0
    }

    fn decode(&self, id: u64, bytes: &[u8], mode: LoadMode) -> Result<Option<PropertyRecord>> {
        check_len(PROPERTY_STORE, id, bytes.len(), PROPERTY_RECORD_SIZE)?;
        let mut buf = bytes;

        let modifiers = buf.get_u8() as u64;
        let prev_mod = (modifiers & 0xF0) << 28;
        let next_mod = (modifiers & 0x0F) << 32;
        let prev_prop = buf.get_u32();
        let next_prop = buf.get_u32();

        let mut words = [0u64; PAYLOAD_WORDS];
        for word in words.iter_mut() {
            *word = buf.get_u64();
        }

        let mut blocks = Vec::new();
        let mut pos = 0;
        while pos < PAYLOAD_WORDS {
            let header = words[pos];
            let type_bits = PropertyType::type_bits(header);
            if type_bits == 0 {
                break;
            }
            let Some(ty) = PropertyType::from_id(type_bits) else {
                if mode == LoadMode::Force {
                    break;
                }
                return Err(Error::corrupt(
                    PROPERTY_STORE,
                    id,
                    format!("unknown property type {} at word {}", type_bits, pos),
                ));
            };
            let used = ty.words_used(header);
            if pos + used > PAYLOAD_WORDS {
                if mode == LoadMode::Force {
                    break;
                }
                return Err(Error::corrupt(
                    PROPERTY_STORE,
                    id,
                    format!("{:?} block at word {} overruns the payload", ty, pos),
                ));
            }
            blocks.push(PropertyBlock {
                value_blocks: words[pos..pos + used].to_vec(),
                value_records: Vec::new(),
            });
            pos += used;
        }

        let record = PropertyRecord {
            id,
            in_use: !blocks.is_empty(),
            prev_prop: long_from_int_and_mod(prev_prop, prev_mod),
            next_prop: long_from_int_and_mod(next_prop, next_mod),
            blocks,
            deleted_blocks: Vec::new(),
        };
        finish_load(PROPERTY_STORE, record, mode)
    }

    fn encode(&self, record: &PropertyRecord, bytes: &mut [u8]) -> Result<()> {
        check_len(PROPERTY_STORE, record.id, bytes.len(), PROPERTY_RECORD_SIZE)?;
        if !record.in_use || record.blocks.is_empty() {
            bytes.fill(0);
            return Ok(());
        }
        check_pointer(PROPERTY_STORE, record.id, "prev_prop", record.prev_prop, 36)?;
        check_pointer(PROPERTY_STORE, record.id, "next_prop", record.next_prop, 36)?;
        if record.used_payload() > PAYLOAD_SIZE {
            return Err(Error::corrupt(
                PROPERTY_STORE,
                record.id,
                format!("blocks take {} bytes of {}", record.used_payload(), PAYLOAD_SIZE),
            ));
        }

        let prev_mod = high_bits(record.prev_prop, 0xF_0000_0000) >> 28;
        let next_mod = high_bits(record.next_prop, 0xF_0000_0000) >> 32;

        let mut out = bytes;
        out.put_u8((prev_mod | next_mod) as u8);
        out.put_u32(low_bits(record.prev_prop));
        out.put_u32(low_bits(record.next_prop));
        let mut written = 0;
        for block in &record.blocks {
            for word in &block.value_blocks {
                out.put_u64(*word);
                written += 1;
            }
        }
        for _ in written..PAYLOAD_WORDS {
            out.put_u64(0);
        }
        Ok(())
    }
}

//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! A [`Context`] holds the two dynamic tables of one connection: the encoder
//! table mirrors what this side told the peer, the decoder table mirrors what
//! the peer told this side. Both must be driven strictly in wire order; the
//! context is owned by the connection and never shared between streams.

pub mod huffman;
pub mod table;

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::HpackError;

pub use table::{DynamicTable, HeaderField, StaticTable, DEFAULT_TABLE_SIZE, STATIC_TABLE_LEN};

use table::TableMatch;

/// Continuation octets accepted after a saturated integer prefix.
/// Five octets already cover every `u32`; more is treated as an attack.
pub const MAX_INTEGER_CONTINUATION_BYTES: usize = 5;

/// Shared compression state for one connection.
#[derive(Debug, Clone)]
pub struct Context {
    encoder: DynamicTable,
    decoder: DynamicTable,
    /// Size update owed to the peer at the start of the next encoded block.
    pending_size_update: Option<usize>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE, DEFAULT_TABLE_SIZE)
    }
}

impl Context {
    pub fn new(encoder_max_size: usize, decoder_max_size: usize) -> Self {
        Self {
            encoder: DynamicTable::new(encoder_max_size),
            decoder: DynamicTable::new(decoder_max_size),
            pending_size_update: None,
        }
    }

    /// Decode a complete header block into fields, in document order.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut src = block;
        let mut fields = Vec::new();

        while let Some(&first) = src.first() {
            if first & 0x80 != 0 {
                // Indexed Header Field
                let index = decode_integer(&mut src, 7)?;
                fields.push(self.lookup(index)?);
            } else if first & 0xc0 == 0x40 {
                // Literal with Incremental Indexing
                let field = self.decode_literal(&mut src, 6)?;
                self.decoder.insert(field.clone());
                fields.push(field);
            } else if first & 0xe0 == 0x20 {
                // Dynamic Table Size Update
                if !fields.is_empty() {
                    return Err(HpackError::LateSizeUpdate);
                }
                let max_size = decode_integer(&mut src, 5)?;
                self.decoder.set_max_size(max_size)?;
            } else {
                // Literal without Indexing (0000) or Never Indexed (0001)
                fields.push(self.decode_literal(&mut src, 4)?);
            }
        }

        Ok(fields)
    }

    /// Encode fields into a header block.
    ///
    /// Exact table matches become indexed representations; everything else is
    /// sent as a literal with incremental indexing and recorded in the encoder
    /// table, so the peer's decoder table ends up identical.
    pub fn encode(&mut self, fields: &[HeaderField]) -> Vec<u8> {
        let mut dst = Vec::new();

        if let Some(max_size) = self.pending_size_update.take() {
            encode_integer(max_size, 5, 0x20, &mut dst);
        }

        for field in fields {
            match self.find(&field.name, &field.value) {
                Some(TableMatch::Full(index)) => encode_integer(index, 7, 0x80, &mut dst),
                Some(TableMatch::Name(index)) => {
                    encode_integer(index, 6, 0x40, &mut dst);
                    encode_string(&field.value, &mut dst);
                    self.encoder.insert(field.clone());
                }
                None => {
                    dst.push(0x40);
                    encode_string(&field.name, &mut dst);
                    encode_string(&field.value, &mut dst);
                    self.encoder.insert(field.clone());
                }
            }
        }

        dst
    }

    /// Encode a name/value mapping. Pseudo-headers go first; the order of the
    /// rest follows the map's iteration order.
    pub fn encode_map(&mut self, headers: &HashMap<String, String>) -> Vec<u8> {
        let mut fields: Vec<HeaderField> = headers
            .iter()
            .map(|(name, value)| {
                HeaderField::new(
                    Bytes::copy_from_slice(name.as_bytes()),
                    Bytes::copy_from_slice(value.as_bytes()),
                )
            })
            .collect();
        fields.sort_by_key(|field| !field.is_pseudo());
        self.encode(&fields)
    }

    /// Encoder table contents, most recent first.
    pub fn encoder_dynamic_table(&self) -> Vec<HeaderField> {
        self.encoder.snapshot()
    }

    /// Decoder table contents, most recent first.
    pub fn decoder_dynamic_table(&self) -> Vec<HeaderField> {
        self.decoder.snapshot()
    }

    pub fn encoder_table(&self) -> &DynamicTable {
        &self.encoder
    }

    pub fn decoder_table(&self) -> &DynamicTable {
        &self.decoder
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE to the encoder table.
    ///
    /// If the table bound changes, the next encoded block opens with a
    /// Dynamic Table Size Update so the peer's decoder follows.
    pub fn set_encoder_limit(&mut self, limit: usize) {
        let before = self.encoder.max_size();
        self.encoder.set_limit(limit);
        if self.encoder.max_size() != before {
            self.pending_size_update = Some(self.encoder.max_size());
        }
    }

    /// Set the bound this side advertises for the peer's size updates.
    pub fn set_decoder_limit(&mut self, limit: usize) {
        self.decoder.set_limit(limit);
    }

    fn lookup(&self, index: usize) -> Result<HeaderField, HpackError> {
        if index <= STATIC_TABLE_LEN {
            StaticTable::lookup(index)
        } else {
            self.decoder.lookup(index)
        }
    }

    fn find(&self, name: &[u8], value: &[u8]) -> Option<TableMatch> {
        let static_match = StaticTable::find(name, value);
        if let Some(TableMatch::Full(_)) = static_match {
            return static_match;
        }
        match self.encoder.find(name, value) {
            Some(TableMatch::Full(index)) => Some(TableMatch::Full(index)),
            dynamic => static_match.or(dynamic),
        }
    }

    fn decode_literal(&self, src: &mut &[u8], prefix_bits: u8) -> Result<HeaderField, HpackError> {
        let name_index = decode_integer(src, prefix_bits)?;
        let name = if name_index == 0 {
            decode_string(src)?
        } else {
            self.lookup(name_index)?.name
        };
        let value = decode_string(src)?;
        Ok(HeaderField { name, value })
    }
}

/// Decode an N-bit prefixed integer (RFC 7541 Section 5.1).
///
/// The flag bits above the prefix in the first octet are ignored.
pub fn decode_integer(src: &mut &[u8], prefix_bits: u8) -> Result<usize, HpackError> {
    let (&first, rest) = src.split_first().ok_or(HpackError::Truncated)?;
    *src = rest;

    let max_prefix = (1u8 << prefix_bits) - 1;
    let prefix = first & max_prefix;
    if prefix < max_prefix {
        return Ok(usize::from(prefix));
    }

    let mut value = u64::from(max_prefix);
    let mut shift = 0u32;
    for _ in 0..MAX_INTEGER_CONTINUATION_BYTES {
        let (&byte, rest) = src.split_first().ok_or(HpackError::Truncated)?;
        *src = rest;
        value += u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            let value = u32::try_from(value).map_err(|_| HpackError::IntegerOverflow)?;
            return usize::try_from(value).map_err(|_| HpackError::IntegerOverflow);
        }
        shift += 7;
    }
    Err(HpackError::IntegerOverflow)
}

/// Encode an N-bit prefixed integer; `flags` fills the bits above the prefix.
pub fn encode_integer(value: usize, prefix_bits: u8, flags: u8, dst: &mut Vec<u8>) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        dst.push(flags | value as u8);
        return;
    }

    dst.push(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        dst.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    dst.push(rest as u8);
}

/// Decode a length-prefixed, optionally Huffman-coded string literal.
pub fn decode_string(src: &mut &[u8]) -> Result<Bytes, HpackError> {
    let huffman = src.first().ok_or(HpackError::Truncated)? & 0x80 != 0;
    let len = decode_integer(src, 7)?;
    if len > src.len() {
        return Err(HpackError::Truncated);
    }
    let (raw, rest) = src.split_at(len);
    *src = rest;

    if huffman {
        Ok(Bytes::from(huffman::decode(raw)?))
    } else {
        Ok(Bytes::copy_from_slice(raw))
    }
}

/// Encode a string literal, Huffman-coded only when that is strictly shorter.
pub fn encode_string(value: &[u8], dst: &mut Vec<u8>) {
    let huffman_len = huffman::encoded_len(value);
    if huffman_len < value.len() {
        encode_integer(huffman_len, 7, 0x80, dst);
        dst.extend_from_slice(&huffman::encode(value));
    } else {
        encode_integer(value.len(), 7, 0x00, dst);
        dst.extend_from_slice(value);
    }
}

// ============================================================================
// Tests
// ============================================================================

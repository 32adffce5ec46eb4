//! HPACK static and dynamic tables (RFC 7541 Section 2.3).

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::HpackError;

/// Number of entries in the static table.
pub const STATIC_TABLE_LEN: usize = 61;

/// Per-entry overhead counted against the dynamic table size.
pub const ENTRY_OVERHEAD: usize = 32;

/// Default SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

static STATIC_TABLE: [(&str, &str); STATIC_TABLE_LEN] = [
    (":authority", ""),                   // 1
    (":method", "GET"),                   // 2
    (":method", "POST"),                  // 3
    (":path", "/"),                       // 4
    (":path", "/index.html"),             // 5
    (":scheme", "http"),                  // 6
    (":scheme", "https"),                 // 7
    (":status", "200"),                   // 8
    (":status", "204"),                   // 9
    (":status", "206"),                   // 10
    (":status", "304"),                   // 11
    (":status", "400"),                   // 12
    (":status", "404"),                   // 13
    (":status", "500"),                   // 14
    ("accept-charset", ""),               // 15
    ("accept-encoding", "gzip, deflate"), // 16
    ("accept-language", ""),              // 17
    ("accept-ranges", ""),                // 18
    ("accept", ""),                       // 19
    ("access-control-allow-origin", ""),  // 20
    ("age", ""),                          // 21
    ("allow", ""),                        // 22
    ("authorization", ""),                // 23
    ("cache-control", ""),                // 24
    ("content-disposition", ""),          // 25
    ("content-encoding", ""),             // 26
    ("content-language", ""),             // 27
    ("content-length", ""),               // 28
    ("content-location", ""),             // 29
    ("content-range", ""),                // 30
    ("content-type", ""),                 // 31
    ("cookie", ""),                       // 32
    ("date", ""),                         // 33
    ("etag", ""),                         // 34
    ("expect", ""),                       // 35
    ("expires", ""),                      // 36
    ("from", ""),                         // 37
    ("host", ""),                         // 38
    ("if-match", ""),                     // 39
    ("if-modified-since", ""),            // 40
    ("if-none-match", ""),                // 41
    ("if-range", ""),                     // 42
    ("if-unmodified-since", ""),          // 43
    ("last-modified", ""),                // 44
    ("link", ""),                         // 45
    ("location", ""),                     // 46
    ("max-forwards", ""),                 // 47
    ("proxy-authenticate", ""),           // 48
    ("proxy-authorization", ""),          // 49
    ("range", ""),                        // 50
    ("referer", ""),                      // 51
    ("refresh", ""),                      // 52
    ("retry-after", ""),                  // 53
    ("server", ""),                       // 54
    ("set-cookie", ""),                   // 55
    ("strict-transport-security", ""),    // 56
    ("transfer-encoding", ""),            // 57
    ("user-agent", ""),                   // 58
    ("vary", ""),                         // 59
    ("via", ""),                          // 60
    ("www-authenticate", ""),             // 61
];

/// A header name/value pair as it travels through HPACK.
///
/// Names and values are raw octets; HPACK itself does not require UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this field for table accounting: name + value + 32.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }
}

/// Result of searching a table for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableMatch {
    /// Name and value both match.
    Full(usize),
    /// Only the name matches.
    Name(usize),
}

/// The fixed, process-wide static table.
pub struct StaticTable;

impl StaticTable {
    /// Look up a static entry by its 1-based index.
    pub fn lookup(index: usize) -> Result<HeaderField, HpackError> {
        match index {
            0 => Err(HpackError::ZeroIndex),
            1..=STATIC_TABLE_LEN => {
                let (name, value) = STATIC_TABLE[index - 1];
                Ok(HeaderField::new(name, value))
            }
            _ => Err(HpackError::InvalidIndex(index)),
        }
    }

    pub(crate) fn find(name: &[u8], value: &[u8]) -> Option<TableMatch> {
        let mut name_match = None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if n.as_bytes() == name {
                if v.as_bytes() == value {
                    return Some(TableMatch::Full(i + 1));
                }
                if name_match.is_none() {
                    name_match = Some(TableMatch::Name(i + 1));
                }
            }
        }
        name_match
    }
}

/// Bounded FIFO table of recently transmitted fields, one per direction.
///
/// Logical indices start at 62 for the most recently inserted entry.
/// `limit` is the externally negotiated upper bound (SETTINGS_HEADER_TABLE_SIZE);
/// `max_size` is the current bound chosen by the encoder, never above `limit`.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
    limit: usize,
}

impl Default for DynamicTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
            limit: max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current total of entry sizes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Insert at the front, evicting from the back until the field fits.
    ///
    /// A field larger than the whole table empties it and is not stored.
    pub fn insert(&mut self, field: HeaderField) {
        let field_size = field.size();
        if field_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.max_size - field_size);
        self.size += field_size;
        self.entries.push_front(field);
    }

    /// Look up an entry by its logical index (62 and up).
    pub fn lookup(&self, index: usize) -> Result<HeaderField, HpackError> {
        if index <= STATIC_TABLE_LEN {
            return Err(HpackError::InvalidIndex(index));
        }
        self.entries
            .get(index - STATIC_TABLE_LEN - 1)
            .cloned()
            .ok_or(HpackError::InvalidIndex(index))
    }

    /// Change the table bound, evicting as needed. Fails above `limit`.
    pub fn set_max_size(&mut self, max_size: usize) -> Result<(), HpackError> {
        if max_size > self.limit {
            return Err(HpackError::SizeUpdateTooLarge {
                requested: max_size,
                limit: self.limit,
            });
        }
        self.max_size = max_size;
        self.evict_to(max_size);
        Ok(())
    }

    /// Change the negotiated upper bound; shrinks `max_size` if it no longer fits.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        if self.max_size > limit {
            self.max_size = limit;
            self.evict_to(limit);
        }
    }

    /// Entries in index order, most recent first.
    pub fn snapshot(&self) -> Vec<HeaderField> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn find(&self, name: &[u8], value: &[u8]) -> Option<TableMatch> {
        let mut name_match = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name == name {
                let index = STATIC_TABLE_LEN + i + 1;
                if entry.value == value {
                    return Some(TableMatch::Full(index));
                }
                if name_match.is_none() {
                    name_match = Some(TableMatch::Name(index));
                }
            }
        }
        name_match
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }
}

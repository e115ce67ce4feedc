//! AMQP field tables carrying string arguments.
//!
//! [`Arguments`] is the user-facing, insertion-ordered `String -> String` map that is attached to
//! queue bindings (for headers exchanges) and to published messages (as the `headers` property).
//! [`FieldTable`] is its encoded form: a list of `(key, kind, value)` entries in insertion order,
//! which is what goes over the wire.
//!
//! The byte layout follows the AMQP 0-9-1 grammar as RabbitMQ implements it:
//!
//! ```text
//! table = u32 byte-length, entry*
//! entry = u8 key-length, key bytes, u8 kind, u32 value-length, value bytes
//! ```

use crate::errors::*;
use bytes::{Buf, BufMut, BytesMut};
use indexmap::IndexMap;
use snafu::OptionExt;
use std::fmt;
use std::iter::FromIterator;

/// The header-exchange argument that selects how binding headers are combined.
pub const X_MATCH: &str = "x-match";

/// The type tag written in front of each field table value.
///
/// Tables built by this crate tag every value `'S'`. Brokers accept that for any string
/// argument. `'x'` is read back as a string too, since some clients tag string arguments that way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// `'S'`: a string with a 32-bit length prefix.
    LongString,
    /// `'x'`: a byte array with a 32-bit length prefix.
    ByteArray,
}

impl FieldKind {
    pub fn tag(self) -> u8 {
        match self {
            FieldKind::LongString => b'S',
            FieldKind::ByteArray => b'x',
        }
    }

    pub fn from_tag(tag: u8) -> Option<FieldKind> {
        match tag {
            b'S' => Some(FieldKind::LongString),
            b'x' => Some(FieldKind::ByteArray),
            _ => None,
        }
    }
}

/// One encoded entry of a [`FieldTable`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldEntry {
    key: String,
    kind: FieldKind,
    value: String,
}

impl FieldEntry {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// An encoded AMQP field table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldTable {
    entries: Vec<FieldEntry>,
    // encoded size of the entries, excluding the table's own length prefix
    body_len: usize,
}

// Largest length a 32-bit length prefix can describe.
const MAX_LONG_LEN: u64 = u32::MAX as u64;

// Encoded size of the table once an entry with these key and value lengths is added.
fn grown_body_len(body_len: usize, key: &str, value_len: usize) -> Result<usize> {
    if key.len() > usize::from(u8::MAX) {
        return FieldKeyTooLongSnafu { key }.fail();
    }
    if value_len as u64 > MAX_LONG_LEN {
        return FieldValueTooLongSnafu { key }.fail();
    }
    let grown = body_len as u64 + (1 + key.len() + 1 + 4) as u64 + value_len as u64;
    if grown > MAX_LONG_LEN {
        return FieldTableTooLargeSnafu.fail();
    }
    Ok(grown as usize)
}

impl FieldTable {
    pub fn new() -> FieldTable {
        FieldTable::default()
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    pub(crate) fn push(&mut self, key: &str, value: &str) -> Result<()> {
        self.push_entry(key.to_string(), FieldKind::LongString, value.to_string())
    }

    fn push_entry(&mut self, key: String, kind: FieldKind, value: String) -> Result<()> {
        self.body_len = grown_body_len(self.body_len, &key, value.len())?;
        self.entries.push(FieldEntry { key, kind, value });
        Ok(())
    }

    /// Number of bytes [`write_to`](#method.write_to) will produce, including the length prefix.
    pub fn encoded_len(&self) -> usize {
        4 + self.body_len
    }

    /// Append the wire encoding of this table to `buf`.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        // every length below was checked against its prefix width when the entry was pushed
        buf.put_u32(self.body_len as u32);
        for entry in &self.entries {
            buf.put_u8(entry.key.len() as u8);
            buf.put_slice(entry.key.as_bytes());
            buf.put_u8(entry.kind.tag());
            buf.put_u32(entry.value.len() as u32);
            buf.put_slice(entry.value.as_bytes());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Parse a table from the front of `buf`, advancing past it.
    ///
    /// Every value must be a string kind; anything else is an
    /// [`UnsupportedFieldKind`](enum.Error.html#variant.UnsupportedFieldKind) error.
    pub fn parse<B: Buf>(buf: &mut B) -> Result<FieldTable> {
        let len = take_u32(buf, "table length")? as usize;
        let body = take(buf, len, "table")?;
        let mut body = &body[..];

        let mut table = FieldTable::new();
        while body.has_remaining() {
            let key_len = usize::from(take_u8(&mut body, "key length")?);
            let key = utf8(take(&mut body, key_len, "key")?, "key")?;
            let tag = take_u8(&mut body, "value kind")?;
            let kind = FieldKind::from_tag(tag).context(UnsupportedFieldKindSnafu { kind: tag })?;
            let value_len = take_u32(&mut body, "value length")? as usize;
            let value = utf8(take(&mut body, value_len, "value")?, "value")?;
            table.push_entry(key, kind, value)?;
        }
        Ok(table)
    }
}

fn malformed<T>(reason: &str) -> Result<T> {
    MalformedTableSnafu { reason }.fail()
}

fn take<B: Buf>(buf: &mut B, len: usize, what: &str) -> Result<Vec<u8>> {
    if buf.remaining() < len {
        return malformed(&format!(
            "{} needs {} bytes but only {} remain",
            what,
            len,
            buf.remaining()
        ));
    }
    let mut out = vec![0; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn take_u8<B: Buf>(buf: &mut B, what: &str) -> Result<u8> {
    if buf.remaining() < 1 {
        return malformed(&format!("{} is truncated", what));
    }
    Ok(buf.get_u8())
}

fn take_u32<B: Buf>(buf: &mut B, what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return malformed(&format!("{} is truncated", what));
    }
    Ok(buf.get_u32())
}

fn utf8(bytes: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(bytes).or_else(|_| malformed(&format!("{} is not valid UTF-8", what)))
}

/// An insertion-ordered set of string arguments.
///
/// ```rust
/// use warren::Arguments;
///
/// let args = Arguments::new().match_any().with("format", "pdf").with("type", "report");
/// let table = args.table().unwrap();
/// assert_eq!(table.num_entries(), 3);
/// assert_eq!(table.entries()[0].key(), "x-match");
/// assert_eq!(Arguments::from_table(&table), args);
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    map: IndexMap<String, String>,
}

impl Arguments {
    pub fn new() -> Arguments {
        Arguments::default()
    }

    /// Insert a key, keeping its original position if it was already present.
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> Option<String> {
        self.map.insert(key.into(), value.into())
    }

    /// Builder form of [`insert`](#method.insert).
    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `x-match` to `all`: a headers binding matches only if every header matches.
    pub fn match_all(self) -> Self {
        self.with(X_MATCH, "all")
    }

    /// Set `x-match` to `any`: a headers binding matches if at least one header matches.
    pub fn match_any(self) -> Self {
        self.with(X_MATCH, "any")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode into a field table, preserving insertion order.
    pub fn table(&self) -> Result<FieldTable> {
        let mut table = FieldTable::new();
        for (key, value) in self.iter() {
            table.push(key, value)?;
        }
        Ok(table)
    }

    /// Decode a field table back into arguments. If a key repeats, the last value wins at the
    /// position of the first occurrence.
    pub fn from_table(table: &FieldTable) -> Arguments {
        table
            .entries()
            .iter()
            .map(|entry| (entry.key(), entry.value()))
            .collect()
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.map.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = Arguments::new();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Arguments {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

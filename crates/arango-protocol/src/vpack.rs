//! Minimal VelocyPack codec for VelocyStream message headers.
//!
//! VelocyStream frames every message as a VelocyPack-encoded header array
//! followed by an opaque payload. Only the value types that can occur in
//! those headers are implemented here: integers, strings, booleans, null,
//! arrays and objects. Application payloads are never interpreted.
//!
//! The reader additionally understands the compact array/object forms
//! (`0x13`/`0x14`) and the equal-size array forms (`0x02`-`0x05`) because
//! servers emit them; the builder always produces index-table containers.

use bytes::Bytes;

use crate::error::ProtocolError;

type Result<T> = core::result::Result<T, ProtocolError>;

fn vpack_err<T>(message: &'static str) -> Result<T> {
    Err(ProtocolError::VPack(message))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Array,
    Object,
}

#[derive(Debug)]
struct Container {
    kind: ContainerKind,
    /// Buffer position where the first item of this container begins.
    start: usize,
    /// Absolute positions of item starts (array) or key starts (object).
    offsets: Vec<usize>,
    /// An object key has been written and its value is still outstanding.
    expect_value: bool,
}

/// Incremental VelocyPack builder.
///
/// Containers are opened and closed explicitly; values nest in the usual
/// way. Objects require [`Builder::add_key`] before each value.
#[derive(Debug, Default)]
pub struct Builder {
    buf: Vec<u8>,
    stack: Vec<Container>,
}

impl Builder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an array.
    pub fn open_array(&mut self) -> Result<()> {
        self.note_value_start()?;
        let start = self.buf.len();
        self.stack.push(Container {
            kind: ContainerKind::Array,
            start,
            offsets: Vec::new(),
            expect_value: false,
        });
        Ok(())
    }

    /// Open an object.
    pub fn open_object(&mut self) -> Result<()> {
        self.note_value_start()?;
        let start = self.buf.len();
        self.stack.push(Container {
            kind: ContainerKind::Object,
            start,
            offsets: Vec::new(),
            expect_value: false,
        });
        Ok(())
    }

    /// Write an object key. The next call must write its value.
    pub fn add_key(&mut self, key: &str) -> Result<()> {
        let Some(top) = self.stack.last_mut() else {
            return vpack_err("key outside of object");
        };
        if top.kind != ContainerKind::Object || top.expect_value {
            return vpack_err("key outside of object");
        }
        top.offsets.push(self.buf.len());
        top.expect_value = true;
        write_string(&mut self.buf, key);
        Ok(())
    }

    /// Write an unsigned integer.
    pub fn add_uint(&mut self, value: u64) -> Result<()> {
        self.note_value_start()?;
        write_uint(&mut self.buf, value);
        Ok(())
    }

    /// Write a string.
    pub fn add_string(&mut self, value: &str) -> Result<()> {
        self.note_value_start()?;
        write_string(&mut self.buf, value);
        Ok(())
    }

    /// Write a boolean.
    pub fn add_bool(&mut self, value: bool) -> Result<()> {
        self.note_value_start()?;
        self.buf.push(if value { 0x1a } else { 0x19 });
        Ok(())
    }

    /// Write a null.
    pub fn add_null(&mut self) -> Result<()> {
        self.note_value_start()?;
        self.buf.push(0x18);
        Ok(())
    }

    /// Close the innermost open container.
    pub fn close(&mut self) -> Result<()> {
        let Some(container) = self.stack.pop() else {
            return vpack_err("close without open container");
        };
        if container.expect_value {
            return vpack_err("object key without value");
        }

        let items = self.buf.split_off(container.start);
        let mut offsets: Vec<usize> = container
            .offsets
            .iter()
            .map(|absolute| absolute - container.start)
            .collect();

        if offsets.is_empty() {
            self.buf.push(match container.kind {
                ContainerKind::Array => 0x01,
                ContainerKind::Object => 0x0a,
            });
            return Ok(());
        }

        if container.kind == ContainerKind::Object {
            // Index table entries must be sorted by attribute name
            offsets.sort_by(|a, b| {
                let left = string_at(&items, *a);
                let right = string_at(&items, *b);
                left.cmp(right)
            });
        }

        let n = offsets.len();
        // 1-byte form: tag + bytelen + nritems, 1-byte index entries
        let small_total = 3 + items.len() + n;
        if small_total <= u8::MAX as usize {
            self.buf.push(match container.kind {
                ContainerKind::Array => 0x06,
                ContainerKind::Object => 0x0b,
            });
            self.buf.push(small_total as u8);
            self.buf.push(n as u8);
            self.buf.extend_from_slice(&items);
            for offset in &offsets {
                self.buf.push((offset + 3) as u8);
            }
        } else {
            // 4-byte form: tag + bytelen + nritems, 4-byte index entries
            let total = 9 + items.len() + n * 4;
            self.buf.push(match container.kind {
                ContainerKind::Array => 0x08,
                ContainerKind::Object => 0x0d,
            });
            self.buf.extend_from_slice(&(total as u32).to_le_bytes());
            self.buf.extend_from_slice(&(n as u32).to_le_bytes());
            self.buf.extend_from_slice(&items);
            for offset in &offsets {
                self.buf
                    .extend_from_slice(&((offset + 9) as u32).to_le_bytes());
            }
        }
        Ok(())
    }

    /// Finish building and return the encoded value.
    pub fn into_bytes(self) -> Result<Bytes> {
        if !self.stack.is_empty() {
            return vpack_err("unclosed container");
        }
        if self.buf.is_empty() {
            return vpack_err("empty builder");
        }
        Ok(Bytes::from(self.buf))
    }

    fn note_value_start(&mut self) -> Result<()> {
        let position = self.buf.len();
        match self.stack.last_mut() {
            None => {
                if position != 0 {
                    return vpack_err("more than one top-level value");
                }
                Ok(())
            }
            Some(top) => match top.kind {
                ContainerKind::Array => {
                    top.offsets.push(position);
                    Ok(())
                }
                ContainerKind::Object => {
                    if !top.expect_value {
                        return vpack_err("object value without key");
                    }
                    top.expect_value = false;
                    Ok(())
                }
            },
        }
    }
}

fn write_uint(buf: &mut Vec<u8>, value: u64) {
    if value <= 9 {
        buf.push(0x30 + value as u8);
        return;
    }
    let bytes = value.to_le_bytes();
    let used = 8 - (value.leading_zeros() as usize) / 8;
    buf.push(0x28 + (used as u8 - 1));
    buf.extend_from_slice(&bytes[..used]);
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    if bytes.len() <= 126 {
        buf.push(0x40 + bytes.len() as u8);
    } else {
        buf.push(0xbf);
        buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    }
    buf.extend_from_slice(bytes);
}

/// Raw bytes of the string value starting at `offset` (builder-internal,
/// only called on strings the builder itself wrote).
fn string_at(items: &[u8], offset: usize) -> &[u8] {
    let tag = items[offset];
    if tag == 0xbf {
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&items[offset + 1..offset + 9]);
        let len = u64::from_le_bytes(len_bytes) as usize;
        &items[offset + 9..offset + 9 + len]
    } else {
        let len = (tag - 0x40) as usize;
        &items[offset + 1..offset + 1 + len]
    }
}

// ---------------------------------------------------------------------------
// Slice
// ---------------------------------------------------------------------------

/// A read-only view over one VelocyPack value.
#[derive(Debug, Clone, Copy)]
pub struct Slice<'a> {
    data: &'a [u8],
}

impl<'a> Slice<'a> {
    /// View the value starting at the beginning of `data`. Trailing bytes
    /// beyond the value are permitted and ignored.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.is_empty() {
            return vpack_err("empty slice");
        }
        Ok(Self { data })
    }

    /// The type tag.
    #[must_use]
    pub fn type_byte(&self) -> u8 {
        self.data[0]
    }

    /// Total encoded length of this value in bytes.
    pub fn byte_size(&self) -> Result<usize> {
        let tag = self.type_byte();
        let size = match tag {
            0x01 | 0x0a | 0x18 | 0x19 | 0x1a => 1,
            0x02..=0x05 => {
                let width = 1usize << (tag - 0x02);
                self.read_length(1, width)?
            }
            0x06..=0x09 => {
                let width = 1usize << (tag - 0x06);
                self.read_length(1, width)?
            }
            0x0b..=0x0e => {
                let width = 1usize << (tag - 0x0b);
                self.read_length(1, width)?
            }
            0x13 | 0x14 => {
                let (length, _) = self.read_vle(1)?;
                length
            }
            0x1b => 9,
            0x20..=0x27 => 2 + (tag - 0x20) as usize,
            0x28..=0x2f => 2 + (tag - 0x28) as usize,
            0x30..=0x3f => 1,
            0x40..=0xbe => 1 + (tag - 0x40) as usize,
            0xbf => {
                let length = self.read_length(1, 8)?;
                9 + length
            }
            _ => return vpack_err("unsupported type tag"),
        };
        if size > self.data.len() {
            return vpack_err("value exceeds available bytes");
        }
        Ok(size)
    }

    /// Whether this value is an array.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.type_byte(), 0x01..=0x09 | 0x13)
    }

    /// Whether this value is an object.
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self.type_byte(), 0x0a..=0x0e | 0x14)
    }

    /// Whether this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.type_byte() == 0x18
    }

    /// Number of members of an array or object.
    pub fn len(&self) -> Result<usize> {
        let tag = self.type_byte();
        match tag {
            0x01 | 0x0a => Ok(0),
            0x02..=0x05 => {
                let (first, end) = self.equal_size_bounds(tag)?;
                let item = Slice::new(&self.data[first..end])?;
                let item_size = item.byte_size()?;
                if item_size == 0 {
                    return vpack_err("zero-size array item");
                }
                Ok((end - first) / item_size)
            }
            0x06..=0x08 => {
                let width = 1usize << (tag - 0x06);
                self.read_length(1 + width, width)
            }
            0x09 => {
                let end = self.byte_size()?;
                self.read_length(end - 8, 8)
            }
            0x0b..=0x0d => {
                let width = 1usize << (tag - 0x0b);
                self.read_length(1 + width, width)
            }
            0x0e => {
                let end = self.byte_size()?;
                self.read_length(end - 8, 8)
            }
            0x13 | 0x14 => {
                let (_, count) = self.compact_bounds()?;
                Ok(count)
            }
            _ => vpack_err("not a container"),
        }
    }

    /// Whether the container has no members.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Member `index` of an array.
    pub fn at(&self, index: usize) -> Result<Slice<'a>> {
        let tag = self.type_byte();
        match tag {
            0x02..=0x05 => {
                let (first, end) = self.equal_size_bounds(tag)?;
                let item = Slice::new(&self.data[first..end])?;
                let item_size = item.byte_size()?;
                let offset = first + index * item_size;
                if offset >= end {
                    return vpack_err("array index out of bounds");
                }
                Slice::new(&self.data[offset..end])
            }
            0x06..=0x09 => {
                let offset = self.table_entry(tag, 0x06, index)?;
                Slice::new(&self.data[offset..])
            }
            0x13 => {
                let (range, count) = self.compact_bounds()?;
                if index >= count {
                    return vpack_err("array index out of bounds");
                }
                let mut position = range.0;
                for _ in 0..index {
                    let item = Slice::new(&self.data[position..range.1])?;
                    position += item.byte_size()?;
                }
                Slice::new(&self.data[position..range.1])
            }
            _ => vpack_err("not an array"),
        }
    }

    /// Look up `key` in an object. Returns `None` when absent.
    pub fn get(&self, key: &str) -> Result<Option<Slice<'a>>> {
        let tag = self.type_byte();
        match tag {
            0x0a => Ok(None),
            0x0b..=0x0e => {
                let n = self.len()?;
                for index in 0..n {
                    let offset = self.table_entry(tag, 0x0b, index)?;
                    let key_slice = Slice::new(&self.data[offset..])?;
                    let key_size = key_slice.byte_size()?;
                    if key_slice.as_str()? == key {
                        return Ok(Some(Slice::new(&self.data[offset + key_size..])?));
                    }
                }
                Ok(None)
            }
            0x14 => {
                let (range, count) = self.compact_bounds()?;
                let mut position = range.0;
                for _ in 0..count {
                    let key_slice = Slice::new(&self.data[position..range.1])?;
                    let key_size = key_slice.byte_size()?;
                    let value_slice = Slice::new(&self.data[position + key_size..range.1])?;
                    if key_slice.as_str()? == key {
                        return Ok(Some(value_slice));
                    }
                    position += key_size + value_slice.byte_size()?;
                }
                Ok(None)
            }
            _ => vpack_err("not an object"),
        }
    }

    /// Key and value of object member `index` (table order for indexed
    /// objects, storage order for compact ones).
    pub fn entry(&self, index: usize) -> Result<(Slice<'a>, Slice<'a>)> {
        let tag = self.type_byte();
        match tag {
            0x0b..=0x0e => {
                let offset = self.table_entry(tag, 0x0b, index)?;
                let key = Slice::new(&self.data[offset..])?;
                let value = Slice::new(&self.data[offset + key.byte_size()?..])?;
                Ok((key, value))
            }
            0x14 => {
                let (range, count) = self.compact_bounds()?;
                if index >= count {
                    return vpack_err("object index out of bounds");
                }
                let mut position = range.0;
                for _ in 0..index {
                    let key = Slice::new(&self.data[position..range.1])?;
                    let key_size = key.byte_size()?;
                    let value = Slice::new(&self.data[position + key_size..range.1])?;
                    position += key_size + value.byte_size()?;
                }
                let key = Slice::new(&self.data[position..range.1])?;
                let key_size = key.byte_size()?;
                let value = Slice::new(&self.data[position + key_size..range.1])?;
                Ok((key, value))
            }
            _ => vpack_err("not an object"),
        }
    }

    /// The value as an unsigned integer.
    pub fn as_u64(&self) -> Result<u64> {
        let tag = self.type_byte();
        match tag {
            0x28..=0x2f => {
                let width = (tag - 0x28) as usize + 1;
                Ok(self.read_length(1, width)? as u64)
            }
            0x20..=0x27 => {
                let value = self.read_signed(tag)?;
                if value < 0 {
                    return vpack_err("negative integer where unsigned expected");
                }
                Ok(value as u64)
            }
            0x30..=0x39 => Ok((tag - 0x30) as u64),
            _ => vpack_err("not an unsigned integer"),
        }
    }

    /// The value as a signed integer.
    pub fn as_i64(&self) -> Result<i64> {
        let tag = self.type_byte();
        match tag {
            0x20..=0x27 => self.read_signed(tag),
            0x28..=0x2f => {
                let value = self.as_u64()?;
                i64::try_from(value).map_err(|_| ProtocolError::VPack("integer overflow"))
            }
            0x30..=0x39 => Ok((tag - 0x30) as i64),
            0x3a..=0x3f => Ok((tag - 0x3a) as i64 - 6),
            _ => vpack_err("not an integer"),
        }
    }

    /// The value as a string.
    pub fn as_str(&self) -> Result<&'a str> {
        let tag = self.type_byte();
        let (start, length) = match tag {
            0x40..=0xbe => (1, (tag - 0x40) as usize),
            0xbf => (9, self.read_length(1, 8)?),
            _ => return vpack_err("not a string"),
        };
        if start + length > self.data.len() {
            return vpack_err("string exceeds available bytes");
        }
        core::str::from_utf8(&self.data[start..start + length])
            .map_err(|_| ProtocolError::VPack("invalid utf-8 in string"))
    }

    /// The value as a boolean.
    pub fn as_bool(&self) -> Result<bool> {
        match self.type_byte() {
            0x19 => Ok(false),
            0x1a => Ok(true),
            _ => vpack_err("not a boolean"),
        }
    }

    // -- internals ---------------------------------------------------------

    fn read_length(&self, offset: usize, width: usize) -> Result<usize> {
        if offset + width > self.data.len() {
            return vpack_err("truncated length field");
        }
        let mut value = 0u64;
        for (i, byte) in self.data[offset..offset + width].iter().enumerate() {
            value |= (*byte as u64) << (8 * i);
        }
        usize::try_from(value).map_err(|_| ProtocolError::VPack("length overflow"))
    }

    fn read_signed(&self, tag: u8) -> Result<i64> {
        let width = (tag - 0x20) as usize + 1;
        if 1 + width > self.data.len() {
            return vpack_err("truncated integer");
        }
        let mut bytes = [0u8; 8];
        bytes[..width].copy_from_slice(&self.data[1..1 + width]);
        // sign-extend
        if self.data[width] & 0x80 != 0 {
            for byte in bytes.iter_mut().skip(width) {
                *byte = 0xff;
            }
        }
        Ok(i64::from_le_bytes(bytes))
    }

    /// Item region of an equal-size array (`0x02`-`0x05`), padding skipped.
    fn equal_size_bounds(&self, tag: u8) -> Result<(usize, usize)> {
        let width = 1usize << (tag - 0x02);
        let end = self.read_length(1, width)?;
        if end > self.data.len() {
            return vpack_err("array exceeds available bytes");
        }
        let mut first = 1 + width;
        while first < end && self.data[first] == 0x00 {
            first += 1;
        }
        if first >= end {
            return vpack_err("array without items");
        }
        Ok((first, end))
    }

    /// Absolute offset of index-table entry `index` for an indexed
    /// array (`base == 0x06`) or object (`base == 0x0b`).
    fn table_entry(&self, tag: u8, base: u8, index: usize) -> Result<usize> {
        let n = self.len()?;
        if index >= n {
            return vpack_err("index out of bounds");
        }
        let end = self.byte_size()?;
        let (width, table_end) = if tag - base == 3 {
            // 8-byte form keeps the member count in the trailing 8 bytes
            (8usize, end - 8)
        } else {
            (1usize << (tag - base), end)
        };
        let entry = table_end - (n - index) * width;
        self.read_length(entry, width)
    }

    /// Item byte range and member count of a compact container
    /// (`0x13`/`0x14`).
    fn compact_bounds(&self) -> Result<((usize, usize), usize)> {
        let (total, header) = self.read_vle(1)?;
        if total > self.data.len() {
            return vpack_err("compact container exceeds available bytes");
        }
        // member count: VLE stored in reverse byte order at the end
        let mut position = total - 1;
        let mut count = (self.data[position] & 0x7f) as usize;
        let mut shift = 7;
        while self.data[position] & 0x80 != 0 {
            if position == header {
                return vpack_err("malformed compact count");
            }
            position -= 1;
            count |= ((self.data[position] & 0x7f) as usize) << shift;
            shift += 7;
        }
        Ok(((header, position), count))
    }

    /// Read a variable-length integer at `offset`; returns the value and
    /// the offset just past it.
    fn read_vle(&self, offset: usize) -> Result<(usize, usize)> {
        let mut value = 0usize;
        let mut shift = 0;
        let mut position = offset;
        loop {
            if position >= self.data.len() {
                return vpack_err("truncated variable-length integer");
            }
            let byte = self.data[position];
            value |= ((byte & 0x7f) as usize) << shift;
            position += 1;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok((value, position))
    }
}

//! DER tag-length-value trees
//!
//! A [`Tlv`] is one DER element. A constructed element owns its first child and
//! every element owns its next sibling, so the members of a SEQUENCE hang off
//! the sequence's `child` as a chain. Parsed elements keep a cheap handle on the
//! buffer they were decoded from, which makes re-encoding an untouched element
//! byte-exact. Built elements compute their lengths from their children.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::{Error, Result};

/// Universal and frequently used tag values
pub mod tags {
    pub const EMPTY: u32 = 0x00;
    pub const BOOLEAN: u32 = 0x01;
    pub const INTEGER: u32 = 0x02;
    pub const BIT_STRING: u32 = 0x03;
    pub const OCTET_STRING: u32 = 0x04;
    pub const NULL: u32 = 0x05;
    pub const OID: u32 = 0x06;
    pub const UTF8_STRING: u32 = 0x0C;
    pub const PRINTABLE_STRING: u32 = 0x13;
    pub const T61_STRING: u32 = 0x14;
    pub const IA5_STRING: u32 = 0x16;
    pub const UTC_TIME: u32 = 0x17;
    pub const GENERALIZED_TIME: u32 = 0x18;
    pub const VISIBLE_STRING: u32 = 0x1A;
    pub const UNIVERSAL_STRING: u32 = 0x1C;
    pub const BMP_STRING: u32 = 0x1E;
    pub const SEQUENCE: u32 = 0x30;
    pub const SET: u32 = 0x31;

    /// Context-specific constructed tag `[n]`
    pub const fn context(n: u8) -> u32 {
        0xA0 | (n as u32 & 0x1F)
    }

    /// Context-specific primitive tag `[n]` (implicit tagging)
    pub const fn implicit(n: u8) -> u32 {
        0x80 | (n as u32 & 0x1F)
    }
}

/// One DER element with its children and following siblings
#[derive(Clone)]
pub struct Tlv {
    tag: u32,
    length: usize,
    header_len: usize,
    value_offset: usize,
    buffer: Bytes,
    /// `buffer[value_offset..value_offset + length]` holds the value
    backed: bool,
    child: Option<Box<Tlv>>,
    next: Option<Box<Tlv>>,
}

impl Tlv {
    /// Decode the element starting at `offset`
    pub fn parse(buffer: &Bytes, offset: usize) -> Result<Self> {
        Self::parse_within(buffer, offset, buffer.len())
    }

    /// Decode a single element from the start of `data`
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::parse(&data.into(), 0)
    }

    /// Decode the element at `offset`, which must end at or before `end`
    pub fn parse_within(buffer: &Bytes, offset: usize, end: usize) -> Result<Self> {
        let end = end.min(buffer.len());
        let (tag, pos) = read_tag(buffer, offset, end)?;
        let (length, value_offset) = read_length(buffer, pos, end)?;

        if length > end - value_offset {
            return Err(Error::MalformedEncoding("length exceeds buffer"));
        }

        let child = if is_constructed(tag) {
            parse_chain(buffer, value_offset, value_offset + length)?
        } else {
            None
        };

        Ok(Self {
            tag,
            length,
            header_len: value_offset - offset,
            value_offset,
            buffer: buffer.clone(),
            backed: true,
            child,
            next: None,
        })
    }

    /// Primitive element carrying `value`
    pub fn primitive(tag: u32, value: impl Into<Bytes>) -> Self {
        let value = value.into();
        let length = value.len();
        let header_len = header_len(tag, length);
        let mut buffer = BytesMut::with_capacity(header_len + length);
        put_tag(&mut buffer, tag);
        put_length(&mut buffer, length);
        buffer.put_slice(&value);
        Self {
            tag,
            length,
            header_len,
            value_offset: header_len,
            buffer: buffer.freeze(),
            backed: true,
            child: None,
            next: None,
        }
    }

    /// Constructed element over `children`
    pub fn constructed(tag: u32, children: impl IntoIterator<Item = Tlv>) -> Self {
        let children: Vec<Tlv> = children.into_iter().collect();
        let length = children.iter().map(Tlv::encoded_len).sum();
        Self {
            tag,
            length,
            header_len: header_len(tag, length),
            value_offset: 0,
            buffer: Bytes::new(),
            backed: false,
            child: link(children),
            next: None,
        }
    }

    pub fn sequence(children: impl IntoIterator<Item = Tlv>) -> Self {
        Self::constructed(tags::SEQUENCE, children)
    }

    /// SET OF, members sorted by their encodings
    pub fn set(children: impl IntoIterator<Item = Tlv>) -> Self {
        let mut children: Vec<Tlv> = children.into_iter().collect();
        children.sort_by_cached_key(Tlv::der_data);
        Self::constructed(tags::SET, children)
    }

    /// Explicitly tagged `[n]` wrapper
    pub fn context(n: u8, children: impl IntoIterator<Item = Tlv>) -> Self {
        Self::constructed(tags::context(n), children)
    }

    pub fn integer(value: i64) -> Self {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < bytes.len() - 1 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        Self::primitive(tags::INTEGER, Bytes::copy_from_slice(&bytes[start..]))
    }

    /// Non-negative INTEGER from big-endian magnitude bytes
    pub fn unsigned_integer(magnitude: &[u8]) -> Self {
        let first = magnitude
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(magnitude.len());
        let digits = &magnitude[first..];
        let mut value = BytesMut::with_capacity(digits.len() + 1);
        if digits.first().is_none_or(|b| b & 0x80 != 0) {
            value.put_u8(0x00);
        }
        value.put_slice(digits);
        Self::primitive(tags::INTEGER, value.freeze())
    }

    pub fn boolean(value: bool) -> Self {
        Self::primitive(tags::BOOLEAN, vec![if value { 0xFF } else { 0x00 }])
    }

    pub fn null() -> Self {
        Self::primitive(tags::NULL, Bytes::new())
    }

    pub fn octet_string(value: impl Into<Bytes>) -> Self {
        Self::primitive(tags::OCTET_STRING, value)
    }

    pub fn utf8_string(value: &str) -> Self {
        Self::primitive(tags::UTF8_STRING, Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn printable_string(value: &str) -> Self {
        Self::primitive(tags::PRINTABLE_STRING, Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn ia5_string(value: &str) -> Self {
        Self::primitive(tags::IA5_STRING, Bytes::copy_from_slice(value.as_bytes()))
    }

    /// BIT STRING with an explicit count of unused trailing bits
    pub fn bit_string(unused_bits: u8, bits: &[u8]) -> Self {
        let mut value = BytesMut::with_capacity(bits.len() + 1);
        value.put_u8(unused_bits);
        value.put_slice(bits);
        Self::primitive(tags::BIT_STRING, value.freeze())
    }

    /// Named-bit BIT STRING with bit 0 the most significant, trailing zeros dropped
    pub fn named_bits(set_bits: &[usize]) -> Self {
        let Some(highest) = set_bits.iter().copied().max() else {
            return Self::bit_string(0, &[]);
        };
        let mut bits = vec![0u8; highest / 8 + 1];
        for bit in set_bits {
            bits[bit / 8] |= 0x80 >> (bit % 8);
        }
        Self::bit_string((7 - highest % 8) as u8, &bits)
    }

    /// OBJECT IDENTIFIER from dotted notation
    pub fn oid(dotted: &str) -> Result<Self> {
        Ok(Self::primitive(tags::OID, encode_oid(dotted)?))
    }

    /// UTCTime `YYMMDDHHMMSSZ`
    pub fn utc_time(at: OffsetDateTime) -> Result<Self> {
        let at = at.to_offset(UtcOffset::UTC);
        if !(1950..2050).contains(&at.year()) {
            return Err(Error::MalformedEncoding("year outside UTCTime range"));
        }
        let text = format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}Z",
            at.year() % 100,
            u8::from(at.month()),
            at.day(),
            at.hour(),
            at.minute(),
            at.second()
        );
        Ok(Self::primitive(tags::UTC_TIME, Bytes::from(text)))
    }

    /// GeneralizedTime `YYYYMMDDHHMMSSZ`
    pub fn generalized_time(at: OffsetDateTime) -> Self {
        let at = at.to_offset(UtcOffset::UTC);
        let text = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}Z",
            at.year(),
            u8::from(at.month()),
            at.day(),
            at.hour(),
            at.minute(),
            at.second()
        );
        Self::primitive(tags::GENERALIZED_TIME, Bytes::from(text))
    }

    pub const fn tag(&self) -> u32 {
        self.tag
    }

    pub const fn length(&self) -> usize {
        self.length
    }

    /// Offset of the value within the parse buffer
    pub const fn value_offset(&self) -> usize {
        self.value_offset
    }

    /// Offset of the first tag byte within the parse buffer
    pub const fn start_offset(&self) -> usize {
        self.value_offset - self.header_len
    }

    /// Offset just past the value within the parse buffer
    pub const fn end_offset(&self) -> usize {
        self.value_offset + self.length
    }

    /// Size of the whole element, header included
    pub const fn encoded_len(&self) -> usize {
        self.header_len + self.length
    }

    pub const fn is_constructed(&self) -> bool {
        is_constructed(self.tag)
    }

    /// Padding placeholder in a directory file
    pub const fn is_empty_marker(&self) -> bool {
        self.tag == tags::EMPTY
    }

    pub fn child(&self) -> Option<&Tlv> {
        self.child.as_deref()
    }

    pub fn next(&self) -> Option<&Tlv> {
        self.next.as_deref()
    }

    /// Iterate over the direct children
    pub fn children(&self) -> Chain<'_> {
        Chain {
            current: self.child(),
        }
    }

    /// Iterate over this element and its following siblings
    pub fn siblings(&self) -> Chain<'_> {
        Chain {
            current: Some(self),
        }
    }

    pub fn child_at(&self, index: usize) -> Option<&Tlv> {
        self.children().nth(index)
    }

    /// First direct child carrying `tag`
    pub fn find(&self, tag: u32) -> Option<&Tlv> {
        self.children().find(|c| c.tag == tag)
    }

    /// Append `child` as the last child of this element
    pub fn push_child(&mut self, child: Tlv) {
        let mut children = unlink(self.child.take());
        children.push(child);
        self.set_children(children);
    }

    /// Replace the children of this element
    pub fn set_children(&mut self, children: Vec<Tlv>) {
        self.length = children.iter().map(Tlv::encoded_len).sum();
        self.header_len = header_len(self.tag, self.length);
        self.backed = false;
        self.buffer = Bytes::new();
        self.value_offset = 0;
        self.child = link(children);
    }

    /// Set the sibling following this element
    pub fn set_next(&mut self, next: Option<Tlv>) {
        self.next = next.map(Box::new);
    }

    /// Value bytes
    pub fn value(&self) -> Bytes {
        if self.backed {
            self.buffer
                .slice(self.value_offset..self.value_offset + self.length)
        } else {
            let mut out = BytesMut::with_capacity(self.length);
            for child in self.children() {
                child.write_der(&mut out);
            }
            out.freeze()
        }
    }

    /// DER encoding of this element and its children
    pub fn der_data(&self) -> Bytes {
        if self.backed {
            return self.buffer.slice(self.start_offset()..self.end_offset());
        }
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.write_der(&mut out);
        out.freeze()
    }

    /// DER encoding of this element followed by all its siblings
    pub fn chain_der_data(&self) -> Bytes {
        let mut out = BytesMut::new();
        for element in self.siblings() {
            element.write_der(&mut out);
        }
        out.freeze()
    }

    fn write_der(&self, out: &mut BytesMut) {
        if self.backed {
            out.put_slice(&self.buffer[self.start_offset()..self.end_offset()]);
            return;
        }
        put_tag(out, self.tag);
        put_length(out, self.length);
        for child in self.children() {
            child.write_der(out);
        }
    }

    /// Same tag, same length, same value bytes
    pub fn matches(&self, other: &Tlv) -> bool {
        self.tag == other.tag && self.length == other.length && self.value() == other.value()
    }

    pub fn as_integer(&self) -> Result<i64> {
        let value = self.value();
        if value.is_empty() || value.len() > 8 {
            return Err(Error::MalformedEncoding("integer out of range"));
        }
        let fill = if value[0] & 0x80 != 0 { 0xFF } else { 0x00 };
        let mut bytes = [fill; 8];
        bytes[8 - value.len()..].copy_from_slice(&value);
        Ok(i64::from_be_bytes(bytes))
    }

    /// Unsigned value of a small INTEGER or OCTET STRING identifier
    pub fn as_u32(&self) -> Result<u32> {
        let value = self.value();
        let digits = match value.iter().position(|b| *b != 0) {
            Some(first) => &value[first..],
            None => &[][..],
        };
        if digits.len() > 4 {
            return Err(Error::MalformedEncoding("identifier out of range"));
        }
        Ok(digits.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
    }

    pub fn as_oid(&self) -> Result<String> {
        if self.tag != tags::OID {
            return Err(Error::MalformedEncoding("expected object identifier"));
        }
        decode_oid(&self.value())
    }

    /// Text of a character string element
    pub fn as_string(&self) -> Option<String> {
        let value = self.value();
        match self.tag {
            tags::UTF8_STRING
            | tags::PRINTABLE_STRING
            | tags::IA5_STRING
            | tags::VISIBLE_STRING
            | tags::T61_STRING => Some(String::from_utf8_lossy(&value).into_owned()),
            tags::BMP_STRING => {
                let units: Vec<u16> = value
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                Some(String::from_utf16_lossy(&units))
            }
            tags::UNIVERSAL_STRING => Some(
                value
                    .chunks_exact(4)
                    .filter_map(|c| char::from_u32(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Result<OffsetDateTime> {
        let value = self.value();
        let text = value.as_ref();
        let (year, rest) = match (self.tag, text.len()) {
            (tags::UTC_TIME, 11 | 13) => {
                let yy = digits(text, 0, 2)? as i32;
                (if yy < 50 { 2000 + yy } else { 1900 + yy }, &text[2..])
            }
            (tags::GENERALIZED_TIME, 15) => (digits(text, 0, 4)? as i32, &text[4..]),
            _ => return Err(Error::MalformedEncoding("unsupported time encoding")),
        };
        if rest.last() != Some(&b'Z') {
            return Err(Error::MalformedEncoding("time is not in UTC"));
        }
        let month = Month::try_from(digits(rest, 0, 2)? as u8)?;
        let day = digits(rest, 2, 2)? as u8;
        let hour = digits(rest, 4, 2)? as u8;
        let minute = digits(rest, 6, 2)? as u8;
        let second = if rest.len() == 11 {
            digits(rest, 8, 2)? as u8
        } else {
            0
        };
        let date = Date::from_calendar_date(year, month, day)?;
        let time = Time::from_hms(hour, minute, second)?;
        Ok(PrimitiveDateTime::new(date, time).assume_utc())
    }

    /// Content of a BIT STRING without the unused-bits octet
    pub fn bit_string_bytes(&self) -> Result<Bytes> {
        let value = self.value();
        if self.tag != tags::BIT_STRING || value.is_empty() {
            return Err(Error::MalformedEncoding("expected bit string"));
        }
        Ok(value.slice(1..))
    }

    /// Named bit `bit` of a BIT STRING, bit 0 being the most significant
    pub fn bit_is_set(&self, bit: usize) -> bool {
        let value = self.value();
        value
            .get(1 + bit / 8)
            .is_some_and(|byte| byte & (0x80 >> (bit % 8)) != 0)
    }
}

impl fmt::Debug for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Tlv");
        s.field("tag", &format_args!("{:#04X}", self.tag))
            .field("length", &self.length);
        if self.is_constructed() {
            s.field("children", &self.children().collect::<Vec<_>>());
        } else {
            s.field("value", &hex::encode_upper(self.value()));
        }
        s.finish()
    }
}

impl PartialEq for Tlv {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for Tlv {}

/// Iterator over a chain of sibling elements
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    current: Option<&'a Tlv>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Tlv;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = current.next();
        Some(current)
    }
}

/// Encode a DER length field
pub fn encode_length(length: usize) -> Bytes {
    let mut out = BytesMut::with_capacity(5);
    put_length(&mut out, length);
    out.freeze()
}

const fn tag_len(tag: u32) -> usize {
    match tag {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

const fn length_len(length: usize) -> usize {
    match length {
        0..=0x7F => 1,
        0x80..=0xFF => 2,
        0x100..=0xFFFF => 3,
        0x1_0000..=0xFF_FFFF => 4,
        _ => 5,
    }
}

const fn header_len(tag: u32, length: usize) -> usize {
    tag_len(tag) + length_len(length)
}

const fn is_constructed(tag: u32) -> bool {
    let leading = tag >> (8 * (tag_len(tag) - 1));
    leading & 0x20 != 0
}

fn put_tag(out: &mut BytesMut, tag: u32) {
    let bytes = tag.to_be_bytes();
    out.put_slice(&bytes[4 - tag_len(tag)..]);
}

fn put_length(out: &mut BytesMut, length: usize) {
    let n = length_len(length);
    if n == 1 {
        out.put_u8(length as u8);
    } else {
        out.put_u8(0x80 | (n - 1) as u8);
        let bytes = (length as u64).to_be_bytes();
        out.put_slice(&bytes[8 - (n - 1)..]);
    }
}

fn read_tag(buffer: &[u8], offset: usize, end: usize) -> Result<(u32, usize)> {
    let first = *buffer
        .get(offset)
        .filter(|_| offset < end)
        .ok_or(Error::MalformedEncoding("missing tag"))?;
    let mut tag = first as u32;
    let mut pos = offset + 1;
    if first & 0x1F == 0x1F {
        loop {
            if pos >= end {
                return Err(Error::MalformedEncoding("truncated tag"));
            }
            if pos - offset >= 4 {
                return Err(Error::MalformedEncoding("tag too long"));
            }
            let byte = buffer[pos];
            tag = (tag << 8) | byte as u32;
            pos += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }
    }
    Ok((tag, pos))
}

fn read_length(buffer: &[u8], offset: usize, end: usize) -> Result<(usize, usize)> {
    if offset >= end {
        return Err(Error::MalformedEncoding("missing length"));
    }
    let first = buffer[offset];
    if first & 0x80 == 0 {
        return Ok((first as usize, offset + 1));
    }
    let n = (first & 0x7F) as usize;
    if n == 0 {
        return Err(Error::MalformedEncoding("indefinite length"));
    }
    if n > 4 {
        return Err(Error::MalformedEncoding("length too long"));
    }
    if offset + 1 + n > end {
        return Err(Error::MalformedEncoding("truncated length"));
    }
    let length = buffer[offset + 1..offset + 1 + n]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((length, offset + 1 + n))
}

fn parse_chain(buffer: &Bytes, start: usize, end: usize) -> Result<Option<Box<Tlv>>> {
    let mut elements = Vec::new();
    let mut pos = start;
    while pos < end {
        let element = Tlv::parse_within(buffer, pos, end)?;
        pos = element.end_offset();
        elements.push(element);
    }
    Ok(link(elements))
}

fn link(elements: Vec<Tlv>) -> Option<Box<Tlv>> {
    elements.into_iter().rev().fold(None, |next, mut element| {
        element.next = next;
        Some(Box::new(element))
    })
}

fn unlink(mut head: Option<Box<Tlv>>) -> Vec<Tlv> {
    let mut elements = Vec::new();
    while let Some(mut element) = head {
        head = element.next.take();
        elements.push(*element);
    }
    elements
}

fn encode_oid(dotted: &str) -> Result<Vec<u8>> {
    let arcs = dotted
        .split('.')
        .map(str::parse::<u64>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::MalformedEncoding("invalid object identifier"))?;
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(Error::MalformedEncoding("invalid object identifier"));
    }

    let mut out = Vec::with_capacity(arcs.len() * 2);
    put_base128(&mut out, arcs[0] * 40 + arcs[1]);
    for arc in &arcs[2..] {
        put_base128(&mut out, *arc);
    }
    Ok(out)
}

fn put_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = [0u8; 10];
    let mut start = groups.len();
    loop {
        start -= 1;
        groups[start] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (i, group) in groups.iter().enumerate().skip(start) {
        out.push(if i < last { group | 0x80 } else { *group });
    }
}

fn decode_oid(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() || bytes[bytes.len() - 1] & 0x80 != 0 {
        return Err(Error::MalformedEncoding("truncated object identifier"));
    }
    let mut arcs = Vec::new();
    let mut value: u64 = 0;
    for byte in bytes {
        if value > u64::MAX >> 7 {
            return Err(Error::MalformedEncoding("object identifier arc too large"));
        }
        value = (value << 7) | (byte & 0x7F) as u64;
        if byte & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
    }
    Ok(arcs
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("."))
}

fn digits(text: &[u8], start: usize, count: usize) -> Result<u32> {
    let field = text
        .get(start..start + count)
        .ok_or(Error::MalformedEncoding("truncated time"))?;
    field.iter().try_fold(0u32, |acc, b| {
        if b.is_ascii_digit() {
            Ok(acc * 10 + (b - b'0') as u32)
        } else {
            Err(Error::MalformedEncoding("non-digit in time"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> Bytes {
        Bytes::from(hex::decode(s.replace(' ', "")).unwrap())
    }

    #[test]
    fn test_parse_nested_sequence() {
        let data = h("30 08 02 01 05 04 03 AA BB CC");
        let tlv = Tlv::parse(&data, 0).unwrap();
        assert_eq!(tlv.tag(), tags::SEQUENCE);
        assert_eq!(tlv.length(), 8);
        assert_eq!(tlv.value_offset(), 2);

        let children: Vec<_> = tlv.children().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].as_integer().unwrap(), 5);
        assert_eq!(children[1].value().as_ref(), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(children[1].value_offset(), 7);
    }

    #[test]
    fn test_parse_rejects_overlong_length() {
        let data = h("04 05 01 02");
        assert!(matches!(
            Tlv::parse(&data, 0),
            Err(Error::MalformedEncoding(_))
        ));

        let data = h("30 04 04 05 01 02");
        assert!(Tlv::parse(&data, 0).is_err());
    }

    #[test]
    fn test_parse_multibyte_tag_and_long_length() {
        let mut raw = vec![0x5F, 0x20, 0x81, 0x80];
        raw.extend(std::iter::repeat_n(0x41, 0x80));
        let tlv = Tlv::from_bytes(raw).unwrap();
        assert_eq!(tlv.tag(), 0x5F20);
        assert_eq!(tlv.length(), 0x80);
        assert_eq!(tlv.value_offset(), 4);
        assert_eq!(tlv.encoded_len(), 0x84);
    }

    #[test]
    fn test_length_encoding() {
        assert_eq!(encode_length(0).as_ref(), &[0x00]);
        assert_eq!(encode_length(127).as_ref(), &[0x7F]);
        assert_eq!(encode_length(128).as_ref(), &[0x81, 0x80]);
        assert_eq!(encode_length(255).as_ref(), &[0x81, 0xFF]);
        assert_eq!(encode_length(256).as_ref(), &[0x82, 0x01, 0x00]);
        assert_eq!(encode_length(0x1_0000).as_ref(), &[0x83, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_built_primitive_encoding() {
        let octets = Tlv::octet_string(vec![0xAA]);
        assert_eq!(octets.der_data(), h("04 01 AA"));
        assert_eq!(octets.value().as_ref(), &[0xAA]);
        assert_eq!(octets.start_offset(), 0);
        assert_eq!(octets.encoded_len(), 3);

        let long = Tlv::primitive(tags::OCTET_STRING, vec![0x55; 200]);
        let der = long.der_data();
        assert_eq!(&der[..3], &[0x04, 0x81, 0xC8]);
        assert_eq!(der.len(), 203);
        assert_eq!(long.value().len(), 200);

        let wrapped = Tlv::sequence([Tlv::integer(1), Tlv::null()]);
        assert_eq!(wrapped.der_data(), h("30 05 02 01 01 05 00"));
    }

    #[test]
    fn test_integer_encoding() {
        assert_eq!(Tlv::integer(0).der_data(), h("02 01 00"));
        assert_eq!(Tlv::integer(127).der_data(), h("02 01 7F"));
        assert_eq!(Tlv::integer(128).der_data(), h("02 02 00 80"));
        assert_eq!(Tlv::integer(-1).der_data(), h("02 01 FF"));
        assert_eq!(Tlv::integer(-129).der_data(), h("02 02 FF 7F"));
        assert_eq!(Tlv::unsigned_integer(&[0x00, 0x00, 0x9A]).der_data(), h("02 02 00 9A"));
        assert_eq!(Tlv::unsigned_integer(&[]).der_data(), h("02 01 00"));
    }

    #[test]
    fn test_oid_encoding() {
        let oid = Tlv::oid("1.2.840.113549.1.1.1").unwrap();
        assert_eq!(oid.der_data(), h("06 09 2A 86 48 86 F7 0D 01 01 01"));
        assert_eq!(oid.as_oid().unwrap(), "1.2.840.113549.1.1.1");

        let oid = Tlv::oid("2.999.3").unwrap();
        assert_eq!(oid.as_oid().unwrap(), "2.999.3");

        assert!(Tlv::oid("1").is_err());
        assert!(Tlv::oid("1.40").is_err());
        assert!(Tlv::oid("1.2.x").is_err());
    }

    #[test]
    fn test_build_and_reparse_tree() {
        let tree = Tlv::sequence([
            Tlv::integer(1),
            Tlv::context(0, [Tlv::utf8_string("label")]),
            Tlv::sequence([Tlv::boolean(true), Tlv::null()]),
            Tlv::octet_string(vec![0u8; 200]),
        ]);
        let encoded = tree.der_data();
        assert_eq!(encoded.len(), tree.encoded_len());

        let parsed = Tlv::parse(&encoded, 0).unwrap();
        assert!(parsed.matches(&tree));
        assert_eq!(parsed.der_data(), encoded);

        let nested = parsed.child_at(1).unwrap().child().unwrap();
        assert_eq!(nested.as_string().as_deref(), Some("label"));
        assert_eq!(parsed.child_at(3).unwrap().length(), 200);
    }

    #[test]
    fn test_set_sorts_members() {
        let set = Tlv::set([Tlv::integer(2), Tlv::integer(1)]);
        assert_eq!(set.der_data(), h("31 06 02 01 01 02 01 02"));
    }

    #[test]
    fn test_push_child_updates_length() {
        let mut seq = Tlv::sequence([Tlv::integer(1)]);
        seq.push_child(Tlv::integer(2));
        assert_eq!(seq.length(), 6);
        assert_eq!(seq.der_data(), h("30 06 02 01 01 02 01 02"));
    }

    #[test]
    fn test_matches_is_bytewise() {
        let a = Tlv::printable_string("FI");
        let b = Tlv::utf8_string("FI");
        assert!(!a.matches(&b));
        assert!(a.matches(&Tlv::printable_string("FI")));
    }

    #[test]
    fn test_named_bits() {
        // digitalSignature
        assert_eq!(Tlv::named_bits(&[0]).der_data(), h("03 02 07 80"));
        // nonRepudiation
        assert_eq!(Tlv::named_bits(&[1]).der_data(), h("03 02 06 40"));
        // PKCS#15 nonRepudiation
        let bits = Tlv::named_bits(&[9]);
        assert_eq!(bits.der_data(), h("03 03 06 00 40"));
        assert!(bits.bit_is_set(9));
        assert!(!bits.bit_is_set(2));
    }

    #[test]
    fn test_time_encoding() {
        let at = Date::from_calendar_date(2024, Month::March, 5)
            .unwrap()
            .with_hms(7, 8, 9)
            .unwrap()
            .assume_utc();
        let utc = Tlv::utc_time(at).unwrap();
        assert_eq!(utc.value().as_ref(), b"240305070809Z");
        assert_eq!(utc.as_time().unwrap(), at);

        let generalized = Tlv::generalized_time(at);
        assert_eq!(generalized.value().as_ref(), b"20240305070809Z");
        assert_eq!(generalized.as_time().unwrap(), at);

        let old = Tlv::primitive(tags::UTC_TIME, Bytes::from_static(b"991231235959Z"));
        assert_eq!(old.as_time().unwrap().year(), 1999);
    }
}

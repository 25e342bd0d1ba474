//! Distinguished names: RFC 2253 strings to and from DER `Name` structures
//!
//! RFC 2253 writes the most specific RDN first while DER stores the RDN sequence
//! from the root down, so [`to_der`] reverses the order of the string's RDNs.
//! [`name_to_string`] renders in DER order with `", "` between RDNs and `" + "`
//! inside a multi-valued RDN. `"CN=Test,O=Org"` therefore displays as
//! `"O=Org, CN=Test"`. [`to_rfc2253`] renders back in RFC 2253 order.

use bytes::Bytes;

use crate::tlv::{Tlv, tags};
use crate::{Error, Result};

struct AttributeType {
    name: &'static str,
    oid: &'static str,
    string_tag: u32,
}

const ATTRIBUTE_TYPES: &[AttributeType] = &[
    AttributeType {
        name: "CN",
        oid: "2.5.4.3",
        string_tag: tags::UTF8_STRING,
    },
    AttributeType {
        name: "C",
        oid: "2.5.4.6",
        string_tag: tags::PRINTABLE_STRING,
    },
    AttributeType {
        name: "L",
        oid: "2.5.4.7",
        string_tag: tags::UTF8_STRING,
    },
    AttributeType {
        name: "ST",
        oid: "2.5.4.8",
        string_tag: tags::UTF8_STRING,
    },
    AttributeType {
        name: "STREET",
        oid: "2.5.4.9",
        string_tag: tags::UTF8_STRING,
    },
    AttributeType {
        name: "O",
        oid: "2.5.4.10",
        string_tag: tags::UTF8_STRING,
    },
    AttributeType {
        name: "OU",
        oid: "2.5.4.11",
        string_tag: tags::UTF8_STRING,
    },
    AttributeType {
        name: "DC",
        oid: "0.9.2342.19200300.100.1.25",
        string_tag: tags::IA5_STRING,
    },
    AttributeType {
        name: "UID",
        oid: "0.9.2342.19200300.100.1.1",
        string_tag: tags::UTF8_STRING,
    },
];

/// Characters that must be escaped inside an attribute value
const SPECIAL: &[char] = &[',', '+', '"', '\\', '<', '>', ';'];

#[derive(Debug)]
enum AttributeValue {
    Text(String),
    /// `#`-prefixed BER encoding
    Encoded(Bytes),
}

type Rdn = Vec<(String, AttributeValue)>;

/// Encode an RFC 2253 string as a DER `Name`
pub fn to_der(name: &str) -> Result<Bytes> {
    let mut rdns = parse_rdns(name)?;
    rdns.reverse();

    let mut sequence = Vec::with_capacity(rdns.len());
    for rdn in rdns {
        let mut attributes = Vec::with_capacity(rdn.len());
        for (attribute_type, value) in rdn {
            let (oid, string_tag) = resolve_type(&attribute_type)?;
            let value = match value {
                AttributeValue::Text(text) => {
                    Tlv::primitive(string_tag, Bytes::from(text.into_bytes()))
                }
                AttributeValue::Encoded(der) => Tlv::from_bytes(der).map_err(|_| {
                    Error::InvalidName(format!("invalid hex value for {attribute_type}"))
                })?,
            };
            let oid = Tlv::oid(&oid)
                .map_err(|_| Error::InvalidName(format!("invalid attribute type {attribute_type}")))?;
            attributes.push(Tlv::sequence([oid, value]));
        }
        sequence.push(Tlv::set(attributes));
    }
    Ok(Tlv::sequence(sequence).der_data())
}

/// Render a `Name` in DER order, `"O=Org, CN=Test"`
pub fn name_to_string(name: &Tlv) -> Result<String> {
    let rdns = render_rdns(name)?;
    Ok(rdns.join(", "))
}

/// Render a `Name` in RFC 2253 order, `"CN=Test,O=Org"`
pub fn to_rfc2253(name: &Tlv) -> Result<String> {
    let mut rdns = render_rdns(name)?;
    rdns.reverse();
    Ok(rdns
        .iter()
        .map(|rdn| rdn.replace(" + ", "+"))
        .collect::<Vec<_>>()
        .join(","))
}

/// X.500 name matching
///
/// Attribute values match when their encodings are identical, or when both are
/// strings that agree after collapsing runs of spaces and ignoring case.
pub fn compare(first: &Tlv, second: &Tlv) -> bool {
    if first.tag() != tags::SEQUENCE || second.tag() != tags::SEQUENCE {
        return first.matches(second);
    }
    if first.children().count() != second.children().count() {
        return false;
    }
    first
        .children()
        .zip(second.children())
        .all(|(a, b)| compare_rdn(a, b))
}

fn compare_rdn(first: &Tlv, second: &Tlv) -> bool {
    if first.children().count() != second.children().count() {
        return false;
    }
    first.children().all(|a| {
        second
            .children()
            .any(|b| compare_attribute(a, b))
    })
}

fn compare_attribute(first: &Tlv, second: &Tlv) -> bool {
    let (Some(type_a), Some(type_b)) = (first.child(), second.child()) else {
        return false;
    };
    if !type_a.matches(type_b) {
        return false;
    }
    match (type_a.next(), type_b.next()) {
        (Some(a), Some(b)) => {
            if a.matches(b) {
                return true;
            }
            match (a.as_string(), b.as_string()) {
                (Some(a), Some(b)) => normalize(&a) == normalize(&b),
                _ => false,
            }
        }
        (None, None) => true,
        _ => false,
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn resolve_type(attribute_type: &str) -> Result<(String, u32)> {
    if let Some(known) = ATTRIBUTE_TYPES
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(attribute_type))
    {
        return Ok((known.oid.to_string(), known.string_tag));
    }

    let dotted = match attribute_type.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("OID.") => &attribute_type[4..],
        _ => attribute_type,
    };
    if dotted.starts_with(|c: char| c.is_ascii_digit()) {
        let string_tag = ATTRIBUTE_TYPES
            .iter()
            .find(|t| t.oid == dotted)
            .map_or(tags::UTF8_STRING, |t| t.string_tag);
        return Ok((dotted.to_string(), string_tag));
    }

    Err(Error::InvalidName(format!(
        "unknown attribute type {attribute_type}"
    )))
}

fn parse_rdns(name: &str) -> Result<Vec<Rdn>> {
    let chars: Vec<char> = name.chars().collect();
    let mut rdns = Vec::new();
    if name.trim().is_empty() {
        return Ok(rdns);
    }

    let mut current = Rdn::new();
    let mut i = 0;
    loop {
        let start = i;
        while i < chars.len() && chars[i] != '=' {
            if matches!(chars[i], ',' | ';' | '+') {
                return Err(Error::InvalidName(format!("missing '=' in {name}")));
            }
            i += 1;
        }
        if i == chars.len() {
            return Err(Error::InvalidName(format!("missing '=' in {name}")));
        }
        let attribute_type: String = chars[start..i].iter().collect::<String>().trim().to_string();
        if attribute_type.is_empty() {
            return Err(Error::InvalidName(format!("missing attribute type in {name}")));
        }

        let (value, next) = parse_value(&chars, i + 1)?;
        current.push((attribute_type, value));
        i = next;

        if i == chars.len() {
            rdns.push(current);
            return Ok(rdns);
        }
        if chars[i] != '+' {
            rdns.push(std::mem::take(&mut current));
        }
        i += 1;
    }
}

fn parse_value(chars: &[char], mut i: usize) -> Result<(AttributeValue, usize)> {
    while i < chars.len() && chars[i] == ' ' {
        i += 1;
    }

    if chars.get(i) == Some(&'#') {
        let start = i + 1;
        while i < chars.len() && !matches!(chars[i], ',' | ';' | '+') {
            i += 1;
        }
        let digits: String = chars[start..i].iter().collect();
        let der = hex::decode(digits.trim_end())
            .map_err(|_| Error::InvalidName(format!("invalid hex value #{digits}")))?;
        return Ok((AttributeValue::Encoded(Bytes::from(der)), i));
    }

    let mut out: Vec<u8> = Vec::new();
    if chars.get(i) == Some(&'"') {
        i += 1;
        loop {
            match chars.get(i) {
                None => return Err(Error::InvalidName("unterminated quoted value".into())),
                Some('"') => break,
                Some('\\') => {
                    i = unescape(chars, i, &mut out)?;
                }
                Some(c) => {
                    push_char(&mut out, *c);
                    i += 1;
                }
            }
        }
        i += 1;
        while i < chars.len() && chars[i] == ' ' {
            i += 1;
        }
        if i < chars.len() && !matches!(chars[i], ',' | ';' | '+') {
            return Err(Error::InvalidName("text after quoted value".into()));
        }
        return Ok((AttributeValue::Text(into_text(out)?), i));
    }

    // bytes up to the last character that is not an unescaped space
    let mut keep = 0;
    while i < chars.len() && !matches!(chars[i], ',' | ';' | '+') {
        if chars[i] == '\\' {
            i = unescape(chars, i, &mut out)?;
            keep = out.len();
        } else {
            push_char(&mut out, chars[i]);
            if chars[i] != ' ' {
                keep = out.len();
            }
            i += 1;
        }
    }
    out.truncate(keep);
    Ok((AttributeValue::Text(into_text(out)?), i))
}

/// Decode the escape sequence at `chars[i]`, returning the index after it
fn unescape(chars: &[char], i: usize, out: &mut Vec<u8>) -> Result<usize> {
    match chars.get(i + 1) {
        Some(c) if SPECIAL.contains(c) || matches!(c, '=' | '#' | ' ') => {
            push_char(out, *c);
            Ok(i + 2)
        }
        Some(hi) if hi.is_ascii_hexdigit() => {
            let lo = chars
                .get(i + 2)
                .filter(|c| c.is_ascii_hexdigit())
                .ok_or_else(|| Error::InvalidName("incomplete hex escape".into()))?;
            let byte = (hi.to_digit(16).unwrap_or(0) << 4) | lo.to_digit(16).unwrap_or(0);
            out.push(byte as u8);
            Ok(i + 3)
        }
        Some(c) => Err(Error::InvalidName(format!("invalid escape \\{c}"))),
        None => Err(Error::InvalidName("dangling escape".into())),
    }
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn into_text(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| Error::InvalidName("value is not valid UTF-8".into()))
}

fn render_rdns(name: &Tlv) -> Result<Vec<String>> {
    if name.tag() != tags::SEQUENCE {
        return Err(Error::MalformedEncoding("name is not a sequence"));
    }
    name.children()
        .map(|rdn| {
            let attributes = rdn
                .children()
                .map(render_attribute)
                .collect::<Result<Vec<_>>>()?;
            Ok(attributes.join(" + "))
        })
        .collect()
}

fn render_attribute(attribute: &Tlv) -> Result<String> {
    let oid_tlv = attribute
        .child()
        .ok_or(Error::MalformedEncoding("empty attribute"))?;
    let value = oid_tlv
        .next()
        .ok_or(Error::MalformedEncoding("attribute without value"))?;
    let oid = oid_tlv.as_oid()?;

    let label = ATTRIBUTE_TYPES
        .iter()
        .find(|t| t.oid == oid)
        .map_or_else(|| format!("OID.{oid}"), |t| t.name.to_string());

    let text = match value.as_string() {
        Some(text) => escape(&text),
        None => format!("#{}", hex::encode_upper(value.der_data())),
    };
    Ok(format!("{label}={text}"))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let leading = i == 0 && (c == '#' || c == ' ');
        let trailing = i == last && c == ' ';
        if SPECIAL.contains(&c) || leading || trailing {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

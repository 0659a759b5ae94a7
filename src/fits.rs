//! Minimal FITS I/O: multi-HDU parsing, header editing, and in-place
//! rewriting.
//!
//! Headers are kept as ordered card lists with typed values so merged
//! keywords land after the existing ones in their original order. Data
//! payloads are never interpreted; they are carried through verbatim.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// FITS block size in bytes.
pub const BLOCK_SIZE: usize = 2880;

/// FITS header card size in bytes.
pub const CARD_SIZE: usize = 80;

/// A typed FITS header card value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Str(String),
    /// Commentary cards and cards with no value.
    None,
}

/// One 80-character header card.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub keyword: String,
    pub value: Value,
    pub comment: Option<String>,
}

impl Card {
    pub fn new(keyword: &str, value: Value, comment: Option<&str>) -> Card {
        Card {
            keyword: keyword.to_string(),
            value,
            comment: comment.map(|c| c.to_string()),
        }
    }

    pub fn int(keyword: &str, value: i64, comment: Option<&str>) -> Card {
        Card::new(keyword, Value::Integer(value), comment)
    }

    pub fn real(keyword: &str, value: f64, comment: Option<&str>) -> Card {
        Card::new(keyword, Value::Real(value), comment)
    }

    pub fn string(keyword: &str, value: &str, comment: Option<&str>) -> Card {
        Card::new(keyword, Value::Str(value.to_string()), comment)
    }

    pub fn logical(keyword: &str, value: bool, comment: Option<&str>) -> Card {
        Card::new(keyword, Value::Logical(value), comment)
    }

    /// COMMENT, HISTORY, and blank-keyword cards.
    pub fn is_commentary(&self) -> bool {
        self.keyword.is_empty() || self.keyword == "COMMENT" || self.keyword == "HISTORY"
    }

    /// Parse one 80-byte card. Returns None for all-blank cards.
    fn parse(raw: &[u8]) -> Option<Card> {
        let keyword = String::from_utf8_lossy(&raw[..8.min(raw.len())])
            .trim()
            .to_string();

        let has_value_indicator = raw.len() > 9 && raw[8] == b'=' && raw[9] == b' ';
        if keyword.is_empty() && raw.iter().all(|&b| b == b' ') {
            return None;
        }

        if !has_value_indicator || keyword == "COMMENT" || keyword == "HISTORY" {
            let body = String::from_utf8_lossy(&raw[8.min(raw.len())..]);
            let body = body.trim_end();
            return Some(Card {
                keyword,
                value: Value::None,
                comment: if body.is_empty() {
                    None
                } else {
                    Some(body.to_string())
                },
            });
        }

        let rest = String::from_utf8_lossy(&raw[10..]);
        let (value, comment) = parse_value(&rest);
        Some(Card {
            keyword,
            value,
            comment,
        })
    }

    /// Render to a fixed 80-byte card image.
    fn render(&self) -> Vec<u8> {
        let mut line = if self.is_commentary() || self.value == Value::None {
            let body = self.comment.as_deref().unwrap_or("");
            format!("{:<8}{}", self.keyword, body)
        } else {
            let value_str = match &self.value {
                Value::Logical(true) => format!("{:>20}", "T"),
                Value::Logical(false) => format!("{:>20}", "F"),
                Value::Integer(v) => format!("{:>20}", v),
                Value::Real(v) => format!("{:>20}", format_real(*v)),
                Value::Str(s) => format!("'{:<8}'", s.replace('\'', "''")),
                Value::None => unreachable!(),
            };
            let mut line = format!("{:<8}= {}", self.keyword, value_str);
            if let Some(comment) = &self.comment {
                line.push_str(" / ");
                line.push_str(comment);
            }
            line
        };

        if line.len() > CARD_SIZE {
            let mut end = CARD_SIZE;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }
        let mut bytes = line.into_bytes();
        bytes.resize(CARD_SIZE, b' ');
        bytes
    }
}

/// Format a real value so it parses back as a real: the shortest
/// round-trip representation, with a decimal point forced in.
fn format_real(v: f64) -> String {
    let s = format!("{}", v);
    if s.contains('.') || s.contains('e') || s.contains('E') || s.contains("inf") || s.contains("NaN")
    {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Split the text after `= ` into a typed value and optional comment.
fn parse_value(text: &str) -> (Value, Option<String>) {
    let trimmed = text.trim_start();

    if let Some(stripped) = trimmed.strip_prefix('\'') {
        // Quoted string; '' is an escaped quote
        let mut value = String::new();
        let mut chars = stripped.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        let rest: String = chars.collect();
        let comment = rest
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return (Value::Str(value.trim_end().to_string()), comment);
    }

    let (value_text, comment) = match trimmed.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        None => (trimmed.trim(), None),
    };

    if value_text.is_empty() {
        return (Value::None, comment);
    }
    if value_text == "T" {
        return (Value::Logical(true), comment);
    }
    if value_text == "F" {
        return (Value::Logical(false), comment);
    }
    if let Ok(v) = value_text.parse::<i64>() {
        return (Value::Integer(v), comment);
    }
    // FORTRAN-style D exponents show up in older writers
    if let Ok(v) = value_text.replace(['D', 'd'], "E").parse::<f64>() {
        return (Value::Real(v), comment);
    }

    (Value::Str(value_text.to_string()), comment)
}

/// An ordered FITS header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Header {
        Header::default()
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn contains_key(&self, keyword: &str) -> bool {
        self.cards.iter().any(|c| c.keyword == keyword)
    }

    /// First card with the given keyword.
    pub fn get(&self, keyword: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.keyword == keyword)
    }

    pub fn get_int(&self, keyword: &str) -> Option<i64> {
        match self.get(keyword)?.value {
            Value::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_real(&self, keyword: &str) -> Option<f64> {
        match self.get(keyword)?.value {
            Value::Real(v) => Some(v),
            Value::Integer(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn get_string(&self, keyword: &str) -> Option<String> {
        match &self.get(keyword)?.value {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Append every candidate card whose keyword is not already present.
    /// Existing values always win; within the candidate, the first
    /// occurrence of a duplicated keyword wins. Returns the number of cards
    /// added.
    pub fn merge_missing(&mut self, candidate: &Header) -> usize {
        let mut added = 0;
        for card in candidate.cards() {
            if card.is_commentary() || self.contains_key(&card.keyword) {
                continue;
            }
            self.cards.push(card.clone());
            added += 1;
        }
        added
    }

    /// Byte size of the data payload this header describes.
    fn data_size(&self) -> usize {
        let bitpix = self.get_int("BITPIX").unwrap_or(0).unsigned_abs() as usize;
        let naxis = self.get_int("NAXIS").unwrap_or(0);
        if naxis == 0 || bitpix == 0 {
            return 0;
        }

        let mut elements: usize = 1;
        for i in 1..=naxis {
            let dim = self.get_int(&format!("NAXIS{}", i)).unwrap_or(0);
            elements = elements.saturating_mul(dim.max(0) as usize);
        }

        // Random-groups / extension bookkeeping, defaults 0 and 1
        let pcount = self.get_int("PCOUNT").unwrap_or(0).max(0) as usize;
        let gcount = self.get_int("GCOUNT").unwrap_or(1).max(1) as usize;

        gcount * (elements + pcount) * (bitpix / 8)
    }
}

/// One header-plus-data unit of a FITS file.
#[derive(Debug, Clone)]
pub struct Hdu {
    pub header: Header,
    /// Raw data payload, exact size (block padding stripped).
    pub data: Vec<u8>,
}

impl Hdu {
    pub fn new(header: Header, data: Vec<u8>) -> Hdu {
        Hdu { header, data }
    }

    /// Number of pixel axes; 0 for a data-less HDU.
    pub fn naxis(&self) -> i64 {
        self.header.get_int("NAXIS").unwrap_or(0)
    }
}

/// A whole FITS file as an ordered list of HDUs.
#[derive(Debug, Clone)]
pub struct FitsFile {
    pub hdus: Vec<Hdu>,
}

impl FitsFile {
    pub fn open(path: &Path) -> Result<FitsFile> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read FITS file: {}", path.display()))?;
        FitsFile::parse(&bytes)
            .with_context(|| format!("Failed to parse FITS file: {}", path.display()))
    }

    pub fn parse(bytes: &[u8]) -> Result<FitsFile> {
        let mut hdus = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let (header, header_len) = parse_header(&bytes[offset..])
                .with_context(|| format!("Malformed header in HDU {}", hdus.len()))?;
            offset += header_len;

            let data_size = header.data_size();
            let padded = data_size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
            if offset + data_size > bytes.len() {
                bail!("Truncated data in HDU {}", hdus.len());
            }
            let data = bytes[offset..offset + data_size].to_vec();
            // Tolerate a missing final padding block; some writers skip it
            offset += padded.min(bytes.len() - offset);

            hdus.push(Hdu::new(header, data));
        }

        if hdus.is_empty() {
            bail!("Empty FITS file");
        }
        Ok(FitsFile { hdus })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for hdu in &self.hdus {
            for card in hdu.header.cards() {
                out.extend_from_slice(&card.render());
            }
            out.extend_from_slice(&Card::new("END", Value::None, None).render());
            pad_to_block(&mut out, b' ');

            out.extend_from_slice(&hdu.data);
            pad_to_block(&mut out, 0);
        }
        out
    }

    /// Rewrite the whole file in place.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes())
            .with_context(|| format!("Failed to write FITS file: {}", path.display()))
    }
}

fn pad_to_block(out: &mut Vec<u8>, fill: u8) {
    let rem = out.len() % BLOCK_SIZE;
    if rem != 0 {
        out.resize(out.len() + BLOCK_SIZE - rem, fill);
    }
}

/// Parse header blocks until END; returns the header and the number of
/// bytes consumed (a whole number of blocks).
fn parse_header(bytes: &[u8]) -> Result<(Header, usize)> {
    let mut header = Header::new();
    let mut offset = 0;

    loop {
        if offset + BLOCK_SIZE > bytes.len() {
            bail!("Header runs past end of file");
        }
        let block = &bytes[offset..offset + BLOCK_SIZE];
        offset += BLOCK_SIZE;

        let mut found_end = false;
        for card_bytes in block.chunks(CARD_SIZE) {
            let keyword = String::from_utf8_lossy(&card_bytes[..8]);
            if keyword.trim_end() == "END" {
                found_end = true;
                break;
            }
            if let Some(card) = Card::parse(card_bytes) {
                header.push(card);
            }
        }
        if found_end {
            return Ok((header, offset));
        }
    }
}

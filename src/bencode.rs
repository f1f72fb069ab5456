use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bencode {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unexpected end of input at {0}")]
    UnexpectedEof(usize),
    #[error("unexpected byte 0x{0:02x} at {1}")]
    UnexpectedByte(u8, usize),
    #[error("invalid integer at {0}")]
    InvalidInteger(usize),
    #[error("leading zero at {0}")]
    LeadingZero(usize),
    #[error("trailing data after value at {0}")]
    TrailingData(usize),
    #[error("invalid dict key at {0}")]
    InvalidDictKey(usize),
    #[error("nesting too deep at {0}")]
    TooDeep(usize),
}

/// Lists and dicts nested deeper than this are rejected.
pub const MAX_DEPTH: usize = 512;

type Result<T> = std::result::Result<T, Error>;

pub fn encode(value: &Bencode) -> Vec<u8> {
    let mut out = Vec::new();
    encode_to(value, &mut out);
    out
}

fn encode_to(value: &Bencode, out: &mut Vec<u8>) {
    match value {
        Bencode::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Bencode::Bytes(bytes) => encode_bytes(bytes, out),
        Bencode::List(items) => {
            out.push(b'l');
            for it in items {
                encode_to(it, out);
            }
            out.push(b'e');
        }
        Bencode::Dict(map) => {
            out.push(b'd');
            for (k, v) in map {
                encode_bytes(k, out);
                encode_to(v, out);
            }
            out.push(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

/// Decodes exactly one value; anything after it is an error.
pub fn decode(bytes: &[u8]) -> Result<Bencode> {
    let mut parser = Parser {
        input: bytes,
        pos: 0,
        depth: 0,
    };
    let value = parser.parse_value()?;
    if parser.pos != bytes.len() {
        return Err(Error::TrailingData(parser.pos));
    }
    Ok(value)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(Error::UnexpectedEof(self.pos))
    }

    fn next(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        let at = self.pos;
        match self.next()? {
            b if b == want => Ok(()),
            other => Err(Error::UnexpectedByte(other, at)),
        }
    }

    fn parse_value(&mut self) -> Result<Bencode> {
        match self.peek()? {
            b'i' => self.parse_int(),
            b'l' => self.nested(Self::parse_list),
            b'd' => self.nested(Self::parse_dict),
            b'0'..=b'9' => self.parse_bytes().map(Bencode::Bytes),
            other => Err(Error::UnexpectedByte(other, self.pos)),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Bencode>) -> Result<Bencode> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::TooDeep(self.pos));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    /// Reads ASCII digits (with an optional leading minus) up to `terminator`.
    fn parse_number(&mut self, terminator: u8, signed: bool) -> Result<i64> {
        let start = self.pos;
        let negative = signed && self.peek()? == b'-';
        if negative {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while self.peek()?.is_ascii_digit() {
            self.pos += 1;
        }
        let digits = &self.input[digits_start..self.pos];
        if digits.is_empty() {
            return Err(Error::InvalidInteger(start));
        }
        if digits[0] == b'0' && (digits.len() > 1 || negative) {
            return Err(Error::LeadingZero(digits_start));
        }
        self.expect(terminator)?;

        // Digits are ASCII, so the slice is valid UTF-8.
        let text = std::str::from_utf8(&self.input[start..self.pos - 1])
            .map_err(|_| Error::InvalidInteger(start))?;
        text.parse::<i64>().map_err(|_| Error::InvalidInteger(start))
    }

    fn parse_int(&mut self) -> Result<Bencode> {
        self.expect(b'i')?;
        Ok(Bencode::Int(self.parse_number(b'e', true)?))
    }

    fn parse_bytes(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        let len = usize::try_from(self.parse_number(b':', false)?)
            .map_err(|_| Error::InvalidInteger(start))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(Error::UnexpectedEof(self.input.len()))?;
        let data = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(data)
    }

    fn parse_list(&mut self) -> Result<Bencode> {
        self.expect(b'l')?;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.parse_value()?);
        }
        self.expect(b'e')?;
        Ok(Bencode::List(items))
    }

    fn parse_dict(&mut self) -> Result<Bencode> {
        self.expect(b'd')?;
        let mut map = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(Error::InvalidDictKey(self.pos));
            }
            let key = self.parse_bytes()?;
            let value = self.parse_value()?;
            map.insert(key, value);
        }
        self.expect(b'e')?;
        Ok(Bencode::Dict(map))
    }
}

impl Bencode {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Bencode::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Bencode::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Byte string decoded as UTF-8, replacing invalid sequences.
    pub fn as_str_lossy(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Bencode>> {
        match self {
            Bencode::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Bencode>> {
        match self {
            Bencode::List(list) => Some(list),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a dict.
    pub fn get(&self, key: &str) -> Option<&Bencode> {
        self.as_dict().and_then(|map| map.get(key.as_bytes()))
    }
}

use super::error::BencodeError;
use super::value::Value;
use bytes::Bytes;
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 32;

/// Decodes a single bencode value, rejecting trailing input.
///
/// The decoder is strict: zero-padded integers, `i-0e`, non-string
/// dictionary keys and over-deep nesting are all errors. Allocation is
/// bounded by the input size.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut parser = Parser { data, pos: 0 };
    let value = parser.value(0)?;

    if parser.pos != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            other => Err(BencodeError::UnexpectedByte(other)),
        }
    }

    fn take_until(&mut self, delimiter: u8) -> Result<&'a [u8], BencodeError> {
        let start = self.pos;
        while self.pos < self.data.len() {
            if self.data[self.pos] == delimiter {
                let taken = &self.data[start..self.pos];
                self.pos += 1;
                return Ok(taken);
            }
            self.pos += 1;
        }
        Err(BencodeError::UnexpectedEof)
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let digits = self.take_until(b'e')?;
        let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger)?;

        // "i-0e" and zero-padded integers are not canonical bencode.
        if text.is_empty() || text.starts_with("-0") {
            return Err(BencodeError::InvalidInteger);
        }
        if text.len() > 1 && text.starts_with('0') {
            return Err(BencodeError::InvalidInteger);
        }

        text.parse()
            .map(Value::Integer)
            .map_err(|_| BencodeError::InvalidInteger)
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let prefix = self.take_until(b':')?;
        let text = std::str::from_utf8(prefix).map_err(|_| BencodeError::InvalidLength)?;
        let len: usize = text.parse().map_err(|_| BencodeError::InvalidLength)?;

        let end = self.pos.checked_add(len).ok_or(BencodeError::InvalidLength)?;
        if end > self.data.len() {
            return Err(BencodeError::UnexpectedEof);
        }

        let bytes = Bytes::copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();

        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }

        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut entries = BTreeMap::new();

        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::NonStringKey);
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }

        self.pos += 1;
        Ok(Value::Dict(entries))
    }
}

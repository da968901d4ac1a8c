//! Minimal reader for NumPy `.npy` files holding a 2-D numeric array.
//!
//! Layout: 6-byte magic, major/minor version bytes, a little-endian header
//! length (u16 for v1, u32 for v2/v3), an ASCII Python dict literal describing
//! `descr`, `fortran_order` and `shape`, then the raw element data.

use super::QuboMatrix;
use crate::error::CoreError;

const MAGIC: &[u8] = b"\x93NUMPY";

pub(super) fn is_npy(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

pub(super) fn parse(bytes: &[u8]) -> Result<QuboMatrix, CoreError> {
    let (header, data) = split_header(bytes)?;
    let header = Header::parse(header)?;

    let [rows, cols] = match header.shape.as_slice() {
        [r, c] => [*r, *c],
        other => {
            return Err(format_error(format!(
                "expected a 2-D array, got shape {other:?}"
            )))
        }
    };

    let count = rows
        .checked_mul(cols)
        .ok_or_else(|| format_error("shape overflows"))?;
    let needed = count
        .checked_mul(header.dtype.size)
        .ok_or_else(|| format_error("shape overflows"))?;
    if data.len() < needed {
        return Err(format_error(format!(
            "truncated data: need {needed} bytes, got {}",
            data.len()
        )));
    }

    let values: Vec<f64> = data[..needed]
        .chunks_exact(header.dtype.size)
        .map(|chunk| header.dtype.decode(chunk))
        .collect();

    let values = if header.fortran_order {
        transpose_column_major(&values, rows, cols)
    } else {
        values
    };

    QuboMatrix::new(rows, cols, values)
}

fn format_error(msg: impl Into<String>) -> CoreError {
    CoreError::DatasetFormat(format!("invalid .npy file: {}", msg.into()))
}

fn split_header(bytes: &[u8]) -> Result<(&str, &[u8]), CoreError> {
    if bytes.len() < MAGIC.len() + 2 {
        return Err(format_error("file too short"));
    }
    let major = bytes[MAGIC.len()];
    let (len, start) = match major {
        1 => {
            let raw = bytes
                .get(8..10)
                .ok_or_else(|| format_error("file too short"))?;
            (u16::from_le_bytes([raw[0], raw[1]]) as usize, 10)
        }
        2 | 3 => {
            let raw = bytes
                .get(8..12)
                .ok_or_else(|| format_error("file too short"))?;
            (
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                12,
            )
        }
        v => return Err(format_error(format!("unsupported format version {v}"))),
    };

    let header = bytes
        .get(start..start + len)
        .ok_or_else(|| format_error("header extends past end of file"))?;
    let header =
        std::str::from_utf8(header).map_err(|_| format_error("header is not valid text"))?;
    Ok((header, &bytes[start + len..]))
}

fn transpose_column_major(values: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    for r in 0..rows {
        for c in 0..cols {
            out.push(values[c * rows + r]);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Element type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Int,
    Uint,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    kind: Kind,
    size: usize,
    big_endian: bool,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, CoreError> {
        let (order, code) = match descr.as_bytes().first() {
            Some(b'<' | b'>' | b'|' | b'=') => descr.split_at(1),
            _ => ("=", descr),
        };
        let big_endian = order == ">";

        let (kind, size) = match code {
            "f4" => (Kind::Float, 4),
            "f8" => (Kind::Float, 8),
            "i1" => (Kind::Int, 1),
            "i2" => (Kind::Int, 2),
            "i4" => (Kind::Int, 4),
            "i8" => (Kind::Int, 8),
            "u1" => (Kind::Uint, 1),
            "u2" => (Kind::Uint, 2),
            "u4" => (Kind::Uint, 4),
            "u8" => (Kind::Uint, 8),
            "b1" => (Kind::Bool, 1),
            other => {
                return Err(format_error(format!("unsupported dtype '{other}'")));
            }
        };
        Ok(Self {
            kind,
            size,
            big_endian,
        })
    }

    fn decode(&self, chunk: &[u8]) -> f64 {
        let mut buf = [0u8; 8];
        if self.big_endian {
            for (i, b) in chunk.iter().rev().enumerate() {
                buf[i] = *b;
            }
        } else {
            buf[..chunk.len()].copy_from_slice(chunk);
        }

        match (self.kind, self.size) {
            (Kind::Float, 4) => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            (Kind::Float, _) => f64::from_le_bytes(buf),
            (Kind::Bool, _) => f64::from(u8::from(buf[0] != 0)),
            (Kind::Uint, _) => u64::from_le_bytes(buf) as f64,
            (Kind::Int, size) => {
                // Sign-extend from the element width.
                let shift = 64 - 8 * size as u32;
                ((i64::from_le_bytes(buf) << shift) >> shift) as f64
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Header dict
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

#[derive(Debug, PartialEq)]
enum Literal {
    Str(String),
    Bool(bool),
    Tuple(Vec<usize>),
}

impl Header {
    fn parse(text: &str) -> Result<Self, CoreError> {
        let mut descr = None;
        let mut fortran_order = None;
        let mut shape = None;

        let mut p = Parser::new(text);
        p.expect('{')?;
        loop {
            p.skip_ws();
            if p.eat('}') {
                break;
            }
            let key = p.string()?;
            p.expect(':')?;
            let value = p.literal()?;
            match (key.as_str(), value) {
                ("descr", Literal::Str(s)) => descr = Some(s),
                ("fortran_order", Literal::Bool(b)) => fortran_order = Some(b),
                ("shape", Literal::Tuple(t)) => shape = Some(t),
                ("descr" | "fortran_order" | "shape", other) => {
                    return Err(format_error(format!("bad value for '{key}': {other:?}")));
                }
                _ => {}
            }
            p.skip_ws();
            if !p.eat(',') {
                p.expect('}')?;
                break;
            }
        }

        let descr = descr.ok_or_else(|| format_error("header has no 'descr'"))?;
        Ok(Self {
            dtype: Dtype::parse(&descr)?,
            fortran_order: fortran_order.unwrap_or(false),
            shape: shape.ok_or_else(|| format_error("header has no 'shape'"))?,
        })
    }
}

struct Parser<'a> {
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, c: char) -> Result<(), CoreError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(format_error(format!("malformed header: expected '{c}'")))
        }
    }

    fn string(&mut self) -> Result<String, CoreError> {
        self.skip_ws();
        let quote = match self.rest.chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(format_error("malformed header: expected a string")),
        };
        let body = &self.rest[1..];
        let end = body
            .find(quote)
            .ok_or_else(|| format_error("malformed header: unterminated string"))?;
        self.rest = &body[end + 1..];
        Ok(body[..end].to_string())
    }

    fn literal(&mut self) -> Result<Literal, CoreError> {
        self.skip_ws();
        if let Some(rest) = self.rest.strip_prefix("True") {
            self.rest = rest;
            return Ok(Literal::Bool(true));
        }
        if let Some(rest) = self.rest.strip_prefix("False") {
            self.rest = rest;
            return Ok(Literal::Bool(false));
        }
        if self.eat('(') {
            let mut items = Vec::new();
            loop {
                if self.eat(')') {
                    break;
                }
                items.push(self.integer()?);
                if !self.eat(',') {
                    self.expect(')')?;
                    break;
                }
            }
            return Ok(Literal::Tuple(items));
        }
        self.string().map(Literal::Str)
    }

    fn integer(&mut self) -> Result<usize, CoreError> {
        self.skip_ws();
        let digits = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        if digits == 0 {
            return Err(format_error("malformed header: expected an integer"));
        }
        let (num, rest) = self.rest.split_at(digits);
        // Python 2 era writers emit `3L`.
        self.rest = rest.strip_prefix('L').unwrap_or(rest);
        num.parse()
            .map_err(|_| format_error("malformed header: integer out of range"))
    }
}

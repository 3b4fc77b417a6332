//! Lossless structured text format (EDN-equivalent), preserving sets,
//! keywords, and distinct numeric types (spec §4.1).
//!
//! No maintained EDN parser crate appears anywhere in the retrieval pack,
//! so this is a small serde-free recursive-descent reader/printer over
//! [`crate::value::Value`] directly, following the same "encode our own
//! value model" approach the teacher takes with `rmpv::Value` everywhere
//! in `core-rust/src/messages/*.rs`.

use base64::Engine;

use crate::error::{DecodeError, EncodeError};
use crate::value::Value;

use super::WireFormat;

pub struct EdnFormat;

impl WireFormat for EdnFormat {
    fn id(&self) -> &'static str {
        "edn"
    }

    fn display_name(&self) -> &'static str {
        "EDN"
    }

    fn content_type(&self) -> &'static str {
        "application/edn"
    }

    fn is_binary(&self) -> bool {
        false
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let mut out = String::new();
        print_value(value, &mut out);
        Ok(out.into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|e| DecodeError {
            format: self.id(),
            reason: e.to_string(),
            raw: bytes.to_vec(),
        })?;
        let mut reader = Reader::new(text);
        let value = reader.read_value().map_err(|reason| DecodeError {
            format: self.id(),
            reason,
            raw: bytes.to_vec(),
        })?;
        reader.skip_whitespace();
        if !reader.at_end() {
            return Err(DecodeError {
                format: self.id(),
                reason: "trailing input after value".to_string(),
                raw: bytes.to_vec(),
            });
        }
        Ok(value)
    }
}

fn print_value(value: &Value, out: &mut String) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::UInt(n) => {
            out.push_str("#u ");
            out.push_str(&n.to_string());
        }
        Value::Float(f) => out.push_str(&format!("{f}")),
        Value::Str(s) => print_string(s, out),
        Value::Keyword(s) => {
            out.push(':');
            out.push_str(s);
        }
        Value::Bytes(b) => {
            out.push_str("#bytes \"");
            out.push_str(&base64::engine::general_purpose::STANDARD.encode(b));
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            print_items(items, out);
            out.push(']');
        }
        Value::Set(items) => {
            out.push_str("#{");
            print_items(items, out);
            out.push('}');
        }
        Value::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                print_value(k, out);
                out.push(' ');
                print_value(v, out);
            }
            out.push('}');
        }
    }
}

fn print_items(items: &[Value], out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        print_value(item, out);
    }
}

fn print_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

struct Reader<'a> {
    chars: std::str::CharIndices<'a>,
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.char_indices(),
            src,
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ',' {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn read_value(&mut self) -> Result<Value, String> {
        self.skip_whitespace();
        match self.peek() {
            None => Err("unexpected end of input".to_string()),
            Some('[') => self.read_array(),
            Some('{') => self.read_map(),
            Some('#') => self.read_dispatch(),
            Some(':') => self.read_keyword(),
            Some('"') => self.read_string().map(Value::Str),
            Some(c) if c == '-' || c.is_ascii_digit() => self.read_number(),
            Some(_) => self.read_symbol(),
        }
    }

    fn read_dispatch(&mut self) -> Result<Value, String> {
        self.bump(); // '#'
        match self.peek() {
            Some('{') => {
                self.bump();
                let items = self.read_seq_until('}')?;
                Ok(Value::Set(items))
            }
            Some('b') => {
                let tag = self.read_symbol_raw();
                if tag != "bytes" {
                    return Err(format!("unsupported tagged literal #{tag}"));
                }
                self.skip_whitespace();
                let s = self.read_string()?;
                base64::engine::general_purpose::STANDARD
                    .decode(s.as_bytes())
                    .map(Value::Bytes)
                    .map_err(|e| e.to_string())
            }
            Some('u') => {
                let tag = self.read_symbol_raw();
                if tag != "u" {
                    return Err(format!("unsupported tagged literal #{tag}"));
                }
                self.skip_whitespace();
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        self.bump();
                    } else {
                        break;
                    }
                }
                self.src[start..self.pos]
                    .parse::<u64>()
                    .map(Value::UInt)
                    .map_err(|e| e.to_string())
            }
            other => Err(format!("unsupported dispatch char {other:?}")),
        }
    }

    fn read_array(&mut self) -> Result<Value, String> {
        self.bump(); // '['
        let items = self.read_seq_until(']')?;
        Ok(Value::Array(items))
    }

    fn read_seq_until(&mut self, close: char) -> Result<Vec<Value>, String> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(items);
            }
            if self.at_end() {
                return Err(format!("unterminated sequence, expected '{close}'"));
            }
            items.push(self.read_value()?);
        }
    }

    fn read_map(&mut self) -> Result<Value, String> {
        self.bump(); // '{'
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Value::Map(entries));
            }
            if self.at_end() {
                return Err("unterminated map, expected '}'".to_string());
            }
            let key = self.read_value()?;
            self.skip_whitespace();
            let val = self.read_value()?;
            entries.push((key, val));
        }
    }

    fn read_keyword(&mut self) -> Result<Value, String> {
        self.bump(); // ':'
        let sym = self.read_symbol_raw();
        if sym.is_empty() {
            return Err("empty keyword".to_string());
        }
        Ok(Value::Keyword(sym))
    }

    fn read_string(&mut self) -> Result<String, String> {
        if self.bump() != Some('"') {
            return Err("expected '\"'".to_string());
        }
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".to_string()),
                Some('"') => return Ok(s),
                Some('\\') => match self.bump() {
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('n') => s.push('\n'),
                    Some(other) => s.push(other),
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn read_number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(Value::Float)
                .map_err(|e| e.to_string())
        } else if let Ok(i) = text.parse::<i64>() {
            Ok(Value::Int(i))
        } else {
            text.parse::<u64>().map(Value::UInt).map_err(|e| e.to_string())
        }
    }

    fn read_symbol_raw(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | '+' | '*' | '!' | '?') {
                self.bump();
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    fn read_symbol(&mut self) -> Result<Value, String> {
        let sym = self.read_symbol_raw();
        match sym.as_str() {
            "nil" => Ok(Value::Nil),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "" => Err(format!(
                "unexpected character {:?}",
                self.peek().unwrap_or('\0')
            )),
            other => Ok(Value::Str(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) {
        let fmt = EdnFormat;
        let bytes = fmt.encode(&value).unwrap();
        let back = fmt.decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn round_trips_keywords_and_sets() {
        round_trip(Value::keyword("news"));
        round_trip(Value::Set(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn round_trips_distinct_numeric_types() {
        round_trip(Value::Int(-42));
        round_trip(Value::UInt(7));
        round_trip(Value::UInt(18_446_744_073_709_551_615));
        round_trip(Value::Float(1.5));
    }

    #[test]
    fn round_trips_nested_maps() {
        round_trip(Value::map_from([
            (Value::keyword("channel"), Value::str("news")),
            (
                Value::keyword("data"),
                Value::Set(vec![Value::Int(1), Value::Int(2)]),
            ),
        ]));
    }

    #[test]
    fn round_trips_bytes() {
        round_trip(Value::Bytes(vec![0, 1, 2, 255]));
    }

    #[test]
    fn decode_error_on_malformed_input() {
        let fmt = EdnFormat;
        let err = fmt.decode(b"[1 2").unwrap_err();
        assert_eq!(err.raw, b"[1 2");
    }
}

//! Incremental decoder for a top-level JSON array
//!
//! Yields one `serde_json::Value` per array element as soon as the element's
//! bytes are complete, so arbitrarily large arrays are never held in memory
//! at once.

use bytes::{Buf, BytesMut};
use semrag_core::SemragError;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Errors raised while splitting the stream into elements
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("I/O error reading source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON array: {0}")]
    Syntax(String),

    #[error("Element {ordinal} is not valid JSON: {source}")]
    Element {
        ordinal: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl From<DecodeError> for SemragError {
    fn from(err: DecodeError) -> Self {
        SemragError::IngestError(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening bracket
    Start,
    /// Between elements
    Between,
    /// Inside an element
    Element,
    /// After the closing bracket
    Done,
}

/// Splits `[elem, elem, ...]` into elements
#[derive(Debug)]
pub struct JsonArrayDecoder {
    state: State,
    depth: usize,
    in_string: bool,
    escaped: bool,
    scanned: usize,
    ordinal: usize,
}

impl JsonArrayDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            depth: 0,
            in_string: false,
            escaped: false,
            scanned: 0,
            ordinal: 0,
        }
    }

    /// End offset of the current element, if its bytes are complete
    fn scan(&mut self, buf: &BytesMut) -> Option<usize> {
        for i in self.scanned..buf.len() {
            let b = buf[i];

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' if self.depth == 0 => return Some(i),
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                // bare scalars end at the next separator
                b',' if self.depth == 0 => return Some(i),
                b if self.depth == 0 && b.is_ascii_whitespace() => return Some(i),
                _ => {}
            }
        }

        self.scanned = buf.len();
        None
    }

    fn skip_while(buf: &mut BytesMut, skip: impl Fn(u8) -> bool) -> bool {
        match buf.iter().position(|&b| !skip(b)) {
            Some(i) => {
                buf.advance(i);
                true
            }
            None => {
                buf.clear();
                false
            }
        }
    }
}

impl Default for JsonArrayDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonArrayDecoder {
    type Item = serde_json::Value;
    type Error = DecodeError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Start => {
                    if !Self::skip_while(buf, |b| b.is_ascii_whitespace()) {
                        return Ok(None);
                    }
                    if buf[0] != b'[' {
                        return Err(DecodeError::Syntax(format!(
                            "expected '[' at start of input, found {:?}",
                            buf[0] as char
                        )));
                    }
                    buf.advance(1);
                    self.state = State::Between;
                }
                State::Between => {
                    if !Self::skip_while(buf, |b| b.is_ascii_whitespace() || b == b',') {
                        return Ok(None);
                    }
                    if buf[0] == b']' {
                        buf.advance(1);
                        self.state = State::Done;
                        continue;
                    }
                    self.state = State::Element;
                    self.depth = 0;
                    self.in_string = false;
                    self.escaped = false;
                    self.scanned = 0;
                }
                State::Element => {
                    let Some(end) = self.scan(buf) else {
                        return Ok(None);
                    };
                    let bytes = buf.split_to(end);
                    let ordinal = self.ordinal;
                    self.ordinal += 1;
                    self.state = State::Between;

                    return serde_json::from_slice(&bytes)
                        .map(Some)
                        .map_err(|source| DecodeError::Element { ordinal, source });
                }
                State::Done => {
                    if Self::skip_while(buf, |b| b.is_ascii_whitespace()) {
                        return Err(DecodeError::Syntax(
                            "unexpected data after closing ']'".to_string(),
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(value) = self.decode(buf)? {
            return Ok(Some(value));
        }

        match self.state {
            State::Done => Ok(None),
            State::Start => Err(DecodeError::Syntax("input is empty".to_string())),
            State::Between | State::Element => Err(DecodeError::Syntax(format!(
                "input ended inside the array after {} elements",
                self.ordinal
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn decode_all(input: &[u8]) -> Result<Vec<serde_json::Value>, DecodeError> {
        let mut decoder = JsonArrayDecoder::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(v) = decoder.decode(&mut buf)? {
            out.push(v);
        }
        while let Some(v) = decoder.decode_eof(&mut buf)? {
            out.push(v);
        }
        Ok(out)
    }

    /// Feed `input` one byte at a time
    fn decode_bytewise(input: &[u8]) -> Result<Vec<serde_json::Value>, DecodeError> {
        let mut decoder = JsonArrayDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for &b in input {
            buf.extend_from_slice(&[b]);
            while let Some(v) = decoder.decode(&mut buf)? {
                out.push(v);
            }
        }
        while let Some(v) = decoder.decode_eof(&mut buf)? {
            out.push(v);
        }
        Ok(out)
    }

    #[test]
    fn test_objects() {
        let input = br#" [ {"title": "Toy Story", "overview": "A toy [spaceship] {crashes}"},
                          {"title": "Heat", "nested": {"a": [1, 2]}} ] "#;
        let values = decode_all(input).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["overview"], "A toy [spaceship] {crashes}");
        assert_eq!(values[1]["nested"]["a"], json!([1, 2]));
    }

    #[test]
    fn test_bytewise_matches_whole() {
        let input = br#"[{"s": "quote \" and \\ backslash"}, "plain", 42, true, null, [1, [2]]]"#;
        let whole = decode_all(input).unwrap();
        let split = decode_bytewise(input).unwrap();
        assert_eq!(whole, split);
        assert_eq!(
            whole,
            vec![
                json!({"s": "quote \" and \\ backslash"}),
                json!("plain"),
                json!(42),
                json!(true),
                json!(null),
                json!([1, [2]]),
            ]
        );
    }

    #[test]
    fn test_empty_array() {
        assert!(decode_all(b"[]").unwrap().is_empty());
        assert!(decode_all(b"  [ \n ]  ").unwrap().is_empty());
    }

    #[test]
    fn test_not_an_array() {
        assert!(matches!(
            decode_all(br#"{"a": 1}"#),
            Err(DecodeError::Syntax(_))
        ));
        assert!(matches!(decode_all(b""), Err(DecodeError::Syntax(_))));
    }

    #[test]
    fn test_truncated_input() {
        let err = decode_all(br#"[{"a": 1}, {"b": "#).unwrap_err();
        assert!(err.to_string().contains("after 1 elements"));
    }

    #[test]
    fn test_invalid_element_names_ordinal() {
        let err = decode_all(br#"[{"a": 1}, {"b": tru}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::Element { ordinal: 1, .. }));
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_elements(
            texts in prop::collection::vec("[a-z \\[\\]{},\"\\\\]{0,12}", 0..8),
            chunk in 1usize..16,
        ) {
            let expected: Vec<serde_json::Value> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| json!({"id": i, "overview": t, "tags": [t]}))
                .collect();
            let input = serde_json::to_vec(&expected).unwrap();

            let mut decoder = JsonArrayDecoder::new();
            let mut buf = BytesMut::new();
            let mut out = Vec::new();
            for piece in input.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(v) = decoder.decode(&mut buf).unwrap() {
                    out.push(v);
                }
            }
            while let Some(v) = decoder.decode_eof(&mut buf).unwrap() {
                out.push(v);
            }

            prop_assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_trailing_garbage() {
        assert!(matches!(
            decode_all(b"[1] x"),
            Err(DecodeError::Syntax(_))
        ));
    }
}

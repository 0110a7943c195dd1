//! Field cursor over comma-separated ASCII decimal input.

use std::str::FromStr;

/// Errors produced while decoding a single input message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,

    #[error("unknown message type {0:?}")]
    UnknownTag(char),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for field `{field}`")]
    InvalidField { field: &'static str, value: String },
}

/// Walks a `a,b,c` field list left to right.
///
/// Each call consumes one field and the delimiter after it. Fields are named
/// by the caller so errors point at the offending position.
#[derive(Debug, Clone)]
pub struct FieldCursor<'a> {
    rest: Option<&'a str>,
}

impl<'a> FieldCursor<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { rest: Some(input) }
    }

    /// Input not yet consumed, or `None` once the last field was taken.
    pub fn remaining(&self) -> Option<&'a str> {
        self.rest
    }

    /// Take the next raw field.
    pub fn next_raw(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        let rest = self.rest.ok_or(DecodeError::MissingField(field))?;
        match rest.split_once(',') {
            Some((head, tail)) => {
                self.rest = Some(tail);
                Ok(head)
            }
            None => {
                self.rest = None;
                Ok(rest)
            }
        }
    }

    /// Take the next field and parse it as a number.
    pub fn next<T: FromStr>(&mut self, field: &'static str) -> Result<T, DecodeError> {
        let raw = self.next_raw(field)?;
        raw.trim().parse().map_err(|_| DecodeError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }
}

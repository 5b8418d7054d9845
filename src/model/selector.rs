// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! PromQL-style series selectors: an optional metric name followed by an
//! optional brace-enclosed list of `label op "value"` matchers.

use super::LABEL_NAME_METRIC;
use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchType {
    Eq,
    NotEq,
    Re,
    NotRe,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchType::Eq => "=",
            MatchType::NotEq => "!=",
            MatchType::Re => "=~",
            MatchType::NotRe => "!~",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Matcher {
    pub match_type: MatchType,
    pub name: String,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let re = match match_type {
            MatchType::Re | MatchType::NotRe => {
                // Anchored, as in Prometheus: the regex must match the
                // whole value.
                let anchored = format!("^(?:{value})$");
                Some(Regex::new(&anchored).map_err(|err| {
                    Error::invalid(format!("invalid matcher regex {value:?}: {err}"))
                })?)
            }
            MatchType::Eq | MatchType::NotEq => None,
        };
        Ok(Self {
            match_type,
            name,
            value,
            re,
        })
    }

    /// Constructs an equality matcher, which cannot fail.
    pub fn must(match_type: MatchType, name: impl Into<String>, value: impl Into<String>) -> Self {
        debug_assert!(matches!(match_type, MatchType::Eq | MatchType::NotEq));
        Self {
            match_type,
            name: name.into(),
            value: value.into(),
            re: None,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Eq => self.value == value,
            MatchType::NotEq => self.value != value,
            MatchType::Re => self.re.as_ref().is_some_and(|re| re.is_match(value)),
            MatchType::NotRe => !self.re.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type, self.value)
    }
}

struct Cursor<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.input[start..self.pos])
    }

    fn quoted_string(&mut self) -> Result<String> {
        if !self.eat(b'"') {
            return Err(self.error("expected quoted string"));
        }
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        _ => return Err(self.error("unsupported escape")),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // Multi-byte characters are copied verbatim.
                    let ch = self.input[self.pos..].chars().next().unwrap();
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn match_type(&mut self) -> Result<MatchType> {
        if self.eat(b'=') {
            if self.eat(b'~') {
                return Ok(MatchType::Re);
            }
            return Ok(MatchType::Eq);
        }
        if self.eat(b'!') {
            if self.eat(b'=') {
                return Ok(MatchType::NotEq);
            }
            if self.eat(b'~') {
                return Ok(MatchType::NotRe);
            }
        }
        Err(self.error("expected one of =, !=, =~, !~"))
    }

    fn error(&self, msg: &str) -> Error {
        Error::invalid(format!(
            "bad selector {:?} at offset {}: {msg}",
            self.input, self.pos
        ))
    }
}

/// Parses a series selector such as `cpu{pod=~"api-.*", zone!="us"}` into a
/// matcher list. A bare metric name becomes a `__name__` equality matcher.
pub fn parse_matchers(input: &str) -> Result<Vec<Matcher>> {
    let mut cursor = Cursor::new(input);
    let mut matchers = Vec::new();

    cursor.skip_whitespace();
    if let Some(name) = cursor.ident() {
        matchers.push(Matcher::must(MatchType::Eq, LABEL_NAME_METRIC, name));
    }
    cursor.skip_whitespace();

    if cursor.eat(b'{') {
        loop {
            cursor.skip_whitespace();
            if cursor.eat(b'}') {
                break;
            }
            let name = cursor
                .ident()
                .ok_or_else(|| cursor.error("expected label name"))?
                .to_string();
            cursor.skip_whitespace();
            let match_type = cursor.match_type()?;
            cursor.skip_whitespace();
            let value = cursor.quoted_string()?;
            matchers.push(Matcher::new(match_type, name, value)?);

            cursor.skip_whitespace();
            if cursor.eat(b',') {
                continue;
            }
            if cursor.eat(b'}') {
                break;
            }
            return Err(cursor.error("expected , or }"));
        }
    }

    cursor.skip_whitespace();
    if cursor.peek().is_some() {
        return Err(cursor.error("trailing characters"));
    }
    if matchers.is_empty() {
        return Err(cursor.error("selector matches nothing"));
    }
    Ok(matchers)
}

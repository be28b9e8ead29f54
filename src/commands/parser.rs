//! Argument Parser Pipeline
//!
//! Every command turns its argument tokens into typed fields with a
//! [`Pipeline`] of small parser units. A unit looks at the remaining tokens
//! and either fires (consuming some of them and writing into a field of the
//! command) or does not fire (leaving everything untouched).
//!
//! ## Parser kinds
//!
//! - positional: [`string`], [`bytes`], [`int`], [`opt_int`], [`float`] fire on the next
//!   token, whatever it is
//! - variadic: [`strings`], [`key_values`], [`score_members`] consume all
//!   remaining tokens
//! - [`flag`]: fires only on its keyword
//! - [`named`]: a keyword followed by sub-parsers that must all fire
//! - [`one_of`]: mutually exclusive alternatives
//!
//! ## Algorithm
//!
//! The pipeline keeps the list of parsers that have not fired yet. Each
//! round tries them in declared order and removes the first one that fires.
//! Rounds stop when nothing fires or no tokens are left; leftover tokens are
//! a syntax error. Positional parsers always fire when tried, so they must be
//! declared before flags and named options; flags and named options may then
//! appear in any order in the input.
//!
//! ```
//! use tablekv::commands::parser::{self, Pipeline};
//! use bytes::Bytes;
//!
//! let args: Vec<Bytes> = ["key", "ex", "10", "nx"].into_iter().map(Bytes::from).collect();
//! let (mut key, mut ttl, mut nx, mut xx) = (String::new(), 0, false, false);
//! Pipeline::new()
//!     .required(1)
//!     .arg(parser::string(&mut key))
//!     .arg(parser::one_of(vec![parser::flag("nx", &mut nx), parser::flag("xx", &mut xx)]))
//!     .arg(parser::named("ex", vec![parser::int(&mut ttl)]))
//!     .run(&args)
//!     .unwrap();
//! assert_eq!((key.as_str(), ttl, nx, xx), ("key", 10, true, false));
//! ```

use crate::types::KeyValue;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Errors in command arguments. Always raised before any storage call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("wrong number of arguments")]
    InvalidArgNum,

    #[error("value is not an integer or out of range")]
    InvalidInt,

    #[error("value is not a valid float")]
    InvalidFloat,

    #[error("syntax error")]
    Syntax,

    #[error("unknown command '{0}'")]
    UnknownCmd(String),

    #[error("unknown subcommand '{0}'")]
    UnknownSubcmd(String),

    #[error("invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("argument is not valid UTF-8")]
    InvalidUtf8,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMember {
    pub score: f64,
    pub member: Bytes,
}

/// One parser unit. Returns `Some(n)` if it fired consuming `n` tokens.
pub struct Parser<'a>(Box<dyn FnMut(&[Bytes]) -> ParseResult<Option<usize>> + 'a>);

impl<'a> Parser<'a> {
    pub fn new(f: impl FnMut(&[Bytes]) -> ParseResult<Option<usize>> + 'a) -> Self {
        Parser(Box::new(f))
    }

    /// Tries the parser on `args`.
    pub fn parse(&mut self, args: &[Bytes]) -> ParseResult<Option<usize>> {
        (self.0)(args)
    }
}

impl fmt::Debug for Parser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Parser")
    }
}

/// Token as text. Key names are stored as text, so a token that is not
/// valid UTF-8 is rejected rather than mapped onto another name.
pub fn to_string(token: &Bytes) -> ParseResult<String> {
    std::str::from_utf8(token)
        .map(str::to_owned)
        .map_err(|_| ParseError::InvalidUtf8)
}

/// Parses a token as a signed 64-bit integer.
pub fn to_int(token: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ParseError::InvalidInt)
}

/// Converts a positive expire time in `unit` milliseconds to milliseconds.
pub fn positive_ms(value: i64, unit: i64, cmd: &'static str) -> ParseResult<i64> {
    if value <= 0 {
        return Err(ParseError::InvalidExpireTime(cmd));
    }
    value
        .checked_mul(unit)
        .ok_or(ParseError::InvalidExpireTime(cmd))
}

/// Parses a token as a float. NaN is rejected; `inf` is accepted.
pub fn to_float(token: &[u8]) -> ParseResult<f64> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or(ParseError::InvalidFloat)
}

/// Positional string.
pub fn string(dest: &mut String) -> Parser<'_> {
    Parser::new(move |args| match args.first() {
        Some(token) => {
            *dest = to_string(token)?;
            Ok(Some(1))
        }
        None => Ok(None),
    })
}

/// Positional raw bytes.
pub fn bytes(dest: &mut Bytes) -> Parser<'_> {
    Parser::new(move |args| match args.first() {
        Some(token) => {
            *dest = token.clone();
            Ok(Some(1))
        }
        None => Ok(None),
    })
}

/// Positional integer.
pub fn int(dest: &mut i64) -> Parser<'_> {
    Parser::new(move |args| match args.first() {
        Some(token) => {
            *dest = to_int(token)?;
            Ok(Some(1))
        }
        None => Ok(None),
    })
}

/// Positional integer for an option whose presence matters.
pub fn opt_int(dest: &mut Option<i64>) -> Parser<'_> {
    Parser::new(move |args| match args.first() {
        Some(token) => {
            *dest = Some(to_int(token)?);
            Ok(Some(1))
        }
        None => Ok(None),
    })
}

/// Positional float.
pub fn float(dest: &mut f64) -> Parser<'_> {
    Parser::new(move |args| match args.first() {
        Some(token) => {
            *dest = to_float(token)?;
            Ok(Some(1))
        }
        None => Ok(None),
    })
}

/// All remaining tokens as strings.
pub fn strings(dest: &mut Vec<String>) -> Parser<'_> {
    Parser::new(move |args| {
        if args.is_empty() {
            return Ok(None);
        }
        *dest = args.iter().map(to_string).collect::<ParseResult<Vec<_>>>()?;
        Ok(Some(args.len()))
    })
}

/// All remaining tokens as `key value` pairs.
pub fn key_values(dest: &mut Vec<KeyValue>) -> Parser<'_> {
    Parser::new(move |args| {
        if args.is_empty() {
            return Ok(None);
        }
        if args.len() % 2 != 0 {
            return Err(ParseError::InvalidArgNum);
        }
        *dest = args
            .chunks_exact(2)
            .map(|pair| Ok(KeyValue::new(to_string(&pair[0])?, pair[1].clone())))
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(Some(args.len()))
    })
}

/// All remaining tokens as `score member` pairs.
pub fn score_members(dest: &mut Vec<ScoreMember>) -> Parser<'_> {
    Parser::new(move |args| {
        if args.is_empty() {
            return Ok(None);
        }
        if args.len() % 2 != 0 {
            return Err(ParseError::Syntax);
        }
        *dest = args
            .chunks_exact(2)
            .map(|pair| {
                Ok(ScoreMember {
                    score: to_float(&pair[0])?,
                    member: pair[1].clone(),
                })
            })
            .collect::<ParseResult<_>>()?;
        Ok(Some(args.len()))
    })
}

/// Case-insensitive keyword that sets `dest` when present.
pub fn flag<'a>(keyword: &'static str, dest: &'a mut bool) -> Parser<'a> {
    Parser::new(move |args| match args.first() {
        Some(token) if token.eq_ignore_ascii_case(keyword.as_bytes()) => {
            *dest = true;
            Ok(Some(1))
        }
        _ => Ok(None),
    })
}

/// Keyword followed by values, e.g. `COUNT 10`. Once the keyword matches,
/// every sub-parser must fire in order.
pub fn named<'a>(keyword: &'static str, mut parsers: Vec<Parser<'a>>) -> Parser<'a> {
    Parser::new(move |args| {
        match args.first() {
            Some(token) if token.eq_ignore_ascii_case(keyword.as_bytes()) => {}
            _ => return Ok(None),
        }
        let mut pos = 1;
        for parser in parsers.iter_mut() {
            match parser.parse(&args[pos..])? {
                Some(n) => pos += n,
                None => return Err(ParseError::Syntax),
            }
        }
        Ok(Some(pos))
    })
}

/// Mutually exclusive alternatives. Fires if exactly one alternative fires;
/// more than one is a syntax error.
pub fn one_of(mut parsers: Vec<Parser<'_>>) -> Parser<'_> {
    Parser::new(move |args| {
        let mut pos = 0;
        let mut fired = 0;
        for parser in parsers.iter_mut() {
            if let Some(n) = parser.parse(&args[pos..])? {
                pos += n;
                fired += 1;
            }
        }
        match fired {
            0 => Ok(None),
            1 => Ok(Some(pos)),
            _ => Err(ParseError::Syntax),
        }
    })
}

/// An ordered set of parser units run against a command's arguments.
#[derive(Debug, Default)]
pub struct Pipeline<'a> {
    required: usize,
    parsers: Vec<Parser<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new() -> Self {
        Self {
            required: 0,
            parsers: Vec::new(),
        }
    }

    /// Minimum number of tokens; fewer is [`ParseError::InvalidArgNum`].
    pub fn required(mut self, n: usize) -> Self {
        self.required = n;
        self
    }

    pub fn arg(mut self, parser: Parser<'a>) -> Self {
        self.parsers.push(parser);
        self
    }

    /// Parses `args`, writing into the parsers' targets.
    pub fn run(self, args: &[Bytes]) -> ParseResult<()> {
        if args.len() < self.required {
            return Err(ParseError::InvalidArgNum);
        }

        let mut pending = self.parsers;
        let mut rest = args;
        while !rest.is_empty() {
            let mut fired = None;
            for (i, parser) in pending.iter_mut().enumerate() {
                if let Some(n) = parser.parse(rest)? {
                    fired = Some((i, n));
                    break;
                }
            }
            let Some((i, n)) = fired else {
                break;
            };
            pending.remove(i);
            rest = &rest[n..];
        }

        if !rest.is_empty() {
            return Err(ParseError::Syntax);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scalar;

    fn args(tokens: &[&str]) -> Vec<Bytes> {
        tokens
            .iter()
            .map(|t| Bytes::copy_from_slice(t.as_bytes()))
            .collect()
    }

    #[test]
    fn test_positional() {
        let (mut key, mut value, mut n, mut f) = (String::new(), Bytes::new(), 0, 0.0);
        Pipeline::new()
            .required(4)
            .arg(string(&mut key))
            .arg(bytes(&mut value))
            .arg(int(&mut n))
            .arg(float(&mut f))
            .run(&args(&["name", "alice", "-42", "2.5"]))
            .unwrap();
        assert_eq!(key, "name");
        assert_eq!(value, "alice");
        assert_eq!(n, -42);
        assert_eq!(f, 2.5);
    }

    #[test]
    fn test_required() {
        let mut key = String::new();
        let res = Pipeline::new()
            .required(1)
            .arg(string(&mut key))
            .run(&[]);
        assert_eq!(res, Err(ParseError::InvalidArgNum));
    }

    #[test]
    fn test_conversion_errors() {
        let mut n = 0;
        let res = Pipeline::new().arg(int(&mut n)).run(&args(&["4.2"]));
        assert_eq!(res, Err(ParseError::InvalidInt));

        let mut f = 0.0;
        let res = Pipeline::new().arg(float(&mut f)).run(&args(&["nan"]));
        assert_eq!(res, Err(ParseError::InvalidFloat));

        let res = Pipeline::new().arg(float(&mut f)).run(&args(&["-inf"]));
        assert_eq!(res, Ok(()));
        assert_eq!(f, f64::NEG_INFINITY);
    }

    #[test]
    fn test_non_utf8_names_rejected() {
        let bad = vec![Bytes::from_static(b"\xff")];

        let mut key = String::new();
        let res = Pipeline::new().arg(string(&mut key)).run(&bad);
        assert_eq!(res, Err(ParseError::InvalidUtf8));

        let mut keys = Vec::new();
        let res = Pipeline::new().arg(strings(&mut keys)).run(&bad);
        assert_eq!(res, Err(ParseError::InvalidUtf8));

        let mut pairs = Vec::new();
        let res = Pipeline::new()
            .arg(key_values(&mut pairs))
            .run(&[Bytes::from_static(b"\xfe"), Bytes::from_static(b"v")]);
        assert_eq!(res, Err(ParseError::InvalidUtf8));

        // Values stay binary-safe.
        let mut value = Bytes::new();
        assert_eq!(Pipeline::new().arg(bytes(&mut value)).run(&bad), Ok(()));
        assert_eq!(value, bad[0]);
    }

    #[test]
    fn test_leftover_tokens() {
        let mut key = String::new();
        let res = Pipeline::new()
            .arg(string(&mut key))
            .run(&args(&["a", "b"]));
        assert_eq!(res, Err(ParseError::Syntax));
    }

    #[test]
    fn test_variadic() {
        let mut keys = Vec::new();
        Pipeline::new()
            .required(1)
            .arg(strings(&mut keys))
            .run(&args(&["a", "b", "c"]))
            .unwrap();
        assert_eq!(keys, ["a", "b", "c"]);

        let mut items = Vec::new();
        Pipeline::new()
            .arg(key_values(&mut items))
            .run(&args(&["a", "1", "b", "2"]))
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].key, "b");
        assert_eq!(items[1].value, Scalar::Bytes(Bytes::from_static(b"2")));

        let mut items = Vec::new();
        let res = Pipeline::new()
            .arg(key_values(&mut items))
            .run(&args(&["a", "1", "b"]));
        assert_eq!(res, Err(ParseError::InvalidArgNum));

        let mut members = Vec::new();
        Pipeline::new()
            .arg(score_members(&mut members))
            .run(&args(&["1.5", "one", "2", "two"]))
            .unwrap();
        assert_eq!(members[0].score, 1.5);
        assert_eq!(members[1].member, "two");

        let mut members = Vec::new();
        let res = Pipeline::new()
            .arg(score_members(&mut members))
            .run(&args(&["x", "one"]));
        assert_eq!(res, Err(ParseError::InvalidFloat));
    }

    #[test]
    fn test_flags_any_order() {
        for tokens in [["k", "nx", "get"], ["k", "GET", "NX"]] {
            let (mut key, mut nx, mut get) = (String::new(), false, false);
            Pipeline::new()
                .arg(string(&mut key))
                .arg(flag("nx", &mut nx))
                .arg(flag("get", &mut get))
                .run(&args(&tokens))
                .unwrap();
            assert!(nx && get);
        }
    }

    #[test]
    fn test_repeated_flag_is_syntax_error() {
        let mut nx = false;
        let res = Pipeline::new()
            .arg(flag("nx", &mut nx))
            .run(&args(&["nx", "nx"]));
        assert_eq!(res, Err(ParseError::Syntax));
    }

    #[test]
    fn test_named() {
        let (mut pattern, mut count) = (String::from("*"), 0);
        Pipeline::new()
            .arg(named("count", vec![int(&mut count)]))
            .arg(named("match", vec![string(&mut pattern)]))
            .run(&args(&["MATCH", "k*", "COUNT", "5"]))
            .unwrap();
        assert_eq!(pattern, "k*");
        assert_eq!(count, 5);

        let mut count = 0;
        let res = Pipeline::new()
            .arg(named("count", vec![int(&mut count)]))
            .run(&args(&["count"]));
        assert_eq!(res, Err(ParseError::Syntax));
    }

    #[test]
    fn test_one_of_mutual_exclusion() {
        let (mut nx, mut xx) = (false, false);
        let res = Pipeline::new()
            .arg(one_of(vec![flag("nx", &mut nx), flag("xx", &mut xx)]))
            .run(&args(&["nx", "xx"]));
        assert_eq!(res, Err(ParseError::Syntax));

        let (mut nx, mut xx) = (false, false);
        let res = Pipeline::new()
            .arg(one_of(vec![flag("nx", &mut nx), flag("xx", &mut xx)]))
            .run(&args(&["nx"]));
        assert_eq!(res, Ok(()));
        assert!(nx);
        assert!(!xx);
    }

    #[test]
    fn test_one_of_named() {
        let (mut ex, mut px, mut keep) = (0, 0, false);
        let res = Pipeline::new()
            .arg(one_of(vec![
                named("ex", vec![int(&mut ex)]),
                named("px", vec![int(&mut px)]),
                flag("keepttl", &mut keep),
            ]))
            .run(&args(&["px", "100", "ex", "1"]));
        assert_eq!(res, Err(ParseError::Syntax));

        let (mut ex, mut px, mut keep) = (0, 0, false);
        Pipeline::new()
            .arg(one_of(vec![
                named("ex", vec![int(&mut ex)]),
                named("px", vec![int(&mut px)]),
                flag("keepttl", &mut keep),
            ]))
            .run(&args(&["px", "100"]))
            .unwrap();
        assert_eq!((ex, px, keep), (0, 100, false));
    }
}

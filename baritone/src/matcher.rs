//! A deliberately narrow C declaration grammar, just wide enough for what [`crate::export`] writes
//! (and hand edits of it).
//!
//! Three shapes are understood, all at the top level:
//! - `T name = scalar;`, where `T` may be left out
//! - `T name = { list };`
//! - `T name[] = { list };`
//!
//! List items are integers, identifiers, `&identifier`, or `CELL(note, instrument, effect)`.
//! Comments and preprocessor lines are skipped. The output is a flat list of records; nothing else
//! of the syntax tree escapes this module.

use std::{fmt::Display, num::TryFromIntError};

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until},
    character::complete::{alpha1, alphanumeric1, char, digit1, hex_digit1, multispace1},
    combinator::{cut, map, map_res, opt, recognize, value},
    error::context,
    multi::{many0, many1, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::song::{Cell, EffectId, Note};

type PResult<'input, O> = IResult<&'input str, O, InnerError<'input>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `T name = scalar;`
    Simple,
    /// `T name = { ... };`
    Struct,
    /// `T name[] = { ... };`
    Array,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration<'input> {
    pub shape: Shape,
    /// The declared type, minus storage and cv-qualifiers (e.g. `unsigned char*`).
    pub type_name: String,
    pub name: &'input str,
    /// For [`Shape::Simple`], this holds exactly the one scalar.
    pub values: Vec<Value<'input>>,
    /// 1-based.
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value<'input> {
    Int(i64),
    Ident(&'input str),
    AddressOf(&'input str),
    Cell(Cell),
}

pub fn parse_declarations(source: &str) -> Result<Vec<Declaration<'_>>, SyntaxError> {
    let mut declarations = Vec::new();
    let mut input = source;
    loop {
        let (start, ()) = blank(input).map_err(|err| SyntaxError::new(source, err))?;
        if start.is_empty() {
            return Ok(declarations);
        }
        let (rest, mut declaration) =
            declaration(start).map_err(|err| SyntaxError::new(source, err))?;
        declaration.line = line_col(source, rest_offset(source, start)).0;
        declarations.push(declaration);
        input = rest;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    /// Innermost first, like a backtrace.
    pub trace: Vec<(usize, usize, String)>,
}

impl SyntaxError {
    fn new(source: &str, err: nom::Err<InnerError<'_>>) -> Self {
        let errors = match err {
            nom::Err::Error(InnerError(errors)) | nom::Err::Failure(InnerError(errors)) => errors,
            // We only use complete parsers.
            nom::Err::Incomplete(_) => vec![(&source[source.len()..], InnerErrorKind::Eof)],
        };
        let trace: Vec<_> = errors
            .into_iter()
            .map(|(remaining, kind)| {
                let (line, column) = line_col(source, rest_offset(source, remaining));
                (line, column, kind.to_string())
            })
            .collect();
        let (line, column) = trace.first().map_or((1, 1), |&(line, column, _)| (line, column));
        Self {
            line,
            column,
            trace,
        }
    }
}

impl Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Syntax error at line {}, column {}", self.line, self.column)?;
        for (line, column, msg) in &self.trace {
            write!(f, "\n\t({line}:{column}) {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

/// `remaining` must be a suffix of `source`.
fn rest_offset(source: &str, remaining: &str) -> usize {
    source.len() - remaining.len()
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (line, before[line_start..].chars().count() + 1)
}

// Declarations.

enum Rhs<'input> {
    Scalar(Value<'input>),
    List(Vec<Value<'input>>),
}

fn declaration(input: &str) -> PResult<Declaration<'_>> {
    fn inner(input: &str) -> PResult<Declaration<'_>> {
        let start = input;
        let (input, words) = many1(ws(type_word))(input)?;
        let (&name, type_words) = match words.split_last() {
            Some((name, type_words)) if *name != "*" => (name, type_words),
            _ => return Err(InnerError::failure(start, InnerErrorKind::MissingName)),
        };
        let (input, brackets) = opt(pair(ws(char('[')), ws(char(']'))))(input)?;
        let (input, _) = cut(ws(char('=')))(input)?;
        let rhs_input = input;
        let (input, rhs) = cut(ws(alt((
            map(
                delimited(char('{'), list, ws(char('}'))),
                Rhs::List,
            ),
            map(scalar, Rhs::Scalar),
        ))))(input)?;
        let (input, _) = cut(ws(char(';')))(input)?;

        let (shape, values) = match (brackets.is_some(), rhs) {
            (false, Rhs::Scalar(value)) => (Shape::Simple, vec![value]),
            (false, Rhs::List(values)) => (Shape::Struct, values),
            (true, Rhs::List(values)) => (Shape::Array, values),
            (true, Rhs::Scalar(_)) => {
                return Err(InnerError::failure(rhs_input, InnerErrorKind::ArrayNeedsList))
            }
        };
        // Only plain assignments may omit the type.
        if type_words.is_empty() && shape != Shape::Simple {
            return Err(InnerError::failure(start, InnerErrorKind::MissingType));
        }

        Ok((
            input,
            Declaration {
                shape,
                type_name: type_name(type_words),
                name,
                values,
                line: 0, // Filled in by the caller, who knows where the source starts.
            },
        ))
    }
    context("parsing declaration from here", inner)(input)
}

fn type_word(input: &str) -> PResult<&str> {
    alt((identifier, tag("*")))(input)
}

fn type_name(words: &[&str]) -> String {
    let mut name = String::new();
    for &word in words {
        match word {
            "static" | "const" | "volatile" | "extern" => {}
            "*" => name.push('*'),
            _ => {
                if !name.is_empty() {
                    name.push(' ');
                }
                name.push_str(word);
            }
        }
    }
    name
}

fn list(input: &str) -> PResult<Vec<Value<'_>>> {
    context(
        "parsing initialiser list from here",
        terminated(
            separated_list0(ws(char(',')), ws(list_item)),
            opt(ws(char(','))),
        ),
    )(input)
}

fn list_item(input: &str) -> PResult<Value<'_>> {
    alt((
        map(cell_literal, Value::Cell),
        map(preceded(char('&'), ws(identifier)), Value::AddressOf),
        scalar,
    ))(input)
}

fn scalar(input: &str) -> PResult<Value<'_>> {
    alt((map(integer, Value::Int), map(identifier, Value::Ident)))(input)
}

fn cell_literal(input: &str) -> PResult<Cell> {
    fn args(input: &str) -> PResult<Cell> {
        let (input, _) = blank(input)?;
        let note_input = input;
        let (input, note_name) = identifier(input)?;
        let note = Note::from_name(note_name).ok_or_else(|| {
            InnerError::failure(note_input, InnerErrorKind::BadNote(note_name.to_owned()))
        })?;
        let (input, _) = ws(char(','))(input)?;
        let (input, _) = blank(input)?;
        let (input, instrument) = try_convert(input, integer)?;
        let (input, _) = ws(char(','))(input)?;
        let (input, _) = blank(input)?;
        let effect_input = input;
        let (input, effect) = integer(input)?;
        let (input, _) = ws(char(')'))(input)?;

        if !(0..=0xFFF).contains(&effect) {
            return Err(InnerError::failure(
                effect_input,
                InnerErrorKind::BadEffect(effect),
            ));
        }
        let effect_code = EffectId::try_from((effect >> 8) as u8)
            .map_err(|_| InnerError::failure(effect_input, InnerErrorKind::BadEffect(effect)))?;
        Ok((
            input,
            Cell::new(note, instrument, effect_code, (effect & 0xFF) as u8),
        ))
    }
    context(
        "parsing CELL from here",
        preceded(pair(tag("CELL"), ws(char('('))), cut(args)),
    )(input)
}

// Lexical elements.

fn identifier(input: &str) -> PResult<&str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn integer(input: &str) -> PResult<i64> {
    context(
        "parsing integer from here",
        alt((
            map_res(
                preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
                |digits| i64::from_str_radix(digits, 16),
            ),
            map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>),
        )),
    )(input)
}

/// Whitespace, comments, and preprocessor directives.
fn blank(input: &str) -> PResult<()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(tag("//"), opt(is_not("\n")))),
            value((), tuple((tag("/*"), take_until("*/"), tag("*/")))),
            value((), pair(char('#'), opt(is_not("\n")))),
        ))),
    )(input)
}

fn ws<'input, O, F>(mut parser: F) -> impl FnMut(&'input str) -> PResult<'input, O>
where
    F: FnMut(&'input str) -> PResult<'input, O>,
{
    move |input| {
        let (input, ()) = blank(input)?;
        parser(input)
    }
}

// Error handling.

#[derive(Debug, Clone)]
struct InnerError<'input>(Vec<(&'input str, InnerErrorKind)>);

impl<'input> InnerError<'input> {
    fn failure(input: &'input str, err_kind: InnerErrorKind) -> nom::Err<Self> {
        nom::Err::Failure(Self(vec![(input, err_kind)]))
    }
}

impl<'input> nom::error::ParseError<&'input str> for InnerError<'input> {
    fn from_error_kind(input: &'input str, kind: nom::error::ErrorKind) -> Self {
        Self(vec![(input, InnerErrorKind::Nom(kind))])
    }

    fn append(input: &'input str, kind: nom::error::ErrorKind, other: Self) -> Self {
        let Self(mut errors) = other;
        errors.push((input, InnerErrorKind::Nom(kind)));
        Self(errors)
    }

    fn from_char(input: &'input str, expected: char) -> Self {
        Self(vec![(input, InnerErrorKind::Expected(expected))])
    }
}

impl<'input> nom::error::ContextError<&'input str> for InnerError<'input> {
    fn add_context(input: &'input str, ctx: &'static str, mut other: Self) -> Self {
        other.0.push((input, InnerErrorKind::Context(ctx)));
        other
    }
}

impl<'input, E> nom::error::FromExternalError<&'input str, E> for InnerError<'input> {
    fn from_external_error(input: &'input str, kind: nom::error::ErrorKind, _err: E) -> Self {
        Self(vec![(input, InnerErrorKind::Nom(kind))])
    }
}

#[derive(Debug, Clone)]
enum InnerErrorKind {
    MissingName,
    MissingType,
    ArrayNeedsList,
    BadNote(String),
    BadEffect(i64),
    NumOutOfRange(TryFromIntError),
    Expected(char),
    Eof,
    Context(&'static str),
    Nom(nom::error::ErrorKind),
}

impl Display for InnerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "Declaration has no name"),
            Self::MissingType => write!(f, "Only simple assignments may omit their type"),
            Self::ArrayNeedsList => write!(f, "Arrays must be initialised with a `{{ ... }}` list"),
            Self::BadNote(name) => write!(f, "Unknown note \"{name}\""),
            Self::BadEffect(n) => write!(f, "Effect out of range (0x{n:x}, expected at most 0xFFF)"),
            Self::NumOutOfRange(err) => write!(f, "Number out of range: {err}"),
            Self::Expected(c) => write!(f, "Expected '{c}'"),
            Self::Eof => write!(f, "Unexpected end of input"),
            Self::Context(ctx) => f.write_str(ctx),
            Self::Nom(err) => write!(f, "Error in parser \"{}\"", err.description()),
        }
    }
}

/// Runs `parser`, and narrows its output to a smaller integer type.
fn try_convert<'input, T, U, F>(input: &'input str, mut parser: F) -> PResult<'input, T>
where
    U: TryInto<T, Error = TryFromIntError>,
    F: FnMut(&'input str) -> PResult<'input, U>,
{
    let (remaining, raw) = parser(input)?;
    match raw.try_into() {
        Ok(t) => Ok((remaining, t)),
        Err(err) => Err(InnerError::failure(input, InnerErrorKind::NumOutOfRange(err))),
    }
}

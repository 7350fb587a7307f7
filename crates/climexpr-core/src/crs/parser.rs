//! CRS parser.
//!
//! Produces a raw syntax tree. Dataset strings stay unparsed tokens here:
//! splitting them needs the project registry, which
//! [`crate::registry::Registry::parse_expr`] supplies when it turns the raw
//! tree into an [`crate::expr::Expr`].
//!
//! ```text
//! expr     := ensemble | page | call postfix* | token
//! call     := ident '(' [arg (',' arg)*] ')'
//! arg      := ident '=' literal | operand
//! operand  := 'None' | expr
//! ensemble := 'ens' '(' '{' string ':' expr (',' string ':' expr)* '}' ')'
//! page     := 'cpage' '(' '[' row (',' row)* ']' (',' ident '=' literal)* ')'
//! row      := '[' operand (',' operand)* ']'
//! postfix  := '.' ident
//! literal  := string | 'true' | 'false' | number | '[' [literal (',' literal)*] ']'
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, multispace0, none_of, one_of},
    combinator::{all_consuming, cut, map, opt, recognize, value},
    error::{context, ContextError, ErrorKind, ParseError as NomParseError},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::{ENSEMBLE_KEYWORD, NULL_OPERAND, PAGE_KEYWORD};
use crate::error::{CrsError, Result};
use crate::expr::{ParamValue, PLACEHOLDER_CRS};

/// Characters that end a dataset token.
const TOKEN_STOP: &str = ",()[]{}='\": \t\r\n";

/// Raw syntax tree of a CRS.
#[derive(Debug, Clone, PartialEq)]
pub enum RawExpr {
    /// `ARG`
    Placeholder,
    /// A dataset string, not yet split into facets.
    Token(String),
    /// `name(args, key=value)`; `None` operands are kept in place.
    Call {
        name: String,
        operands: Vec<Option<RawExpr>>,
        params: Vec<(String, ParamValue)>,
    },
    /// `ens({'label':expr,...})`
    Ensemble(Vec<(String, RawExpr)>),
    /// `cpage([[...],...], key=value)`
    Page {
        rows: Vec<Vec<Option<RawExpr>>>,
        params: Vec<(String, ParamValue)>,
    },
    /// `father.name`
    Output { father: Box<RawExpr>, name: String },
}

enum Arg {
    Operand(Option<RawExpr>),
    Param(String, ParamValue),
}

/// Parses a complete CRS.
pub fn parse_crs(input: &str) -> Result<RawExpr> {
    match all_consuming(delimited(
        multispace0::<_, nom::error::VerboseError<&str>>,
        expr,
        multispace0,
    ))(input)
    {
        Ok((_, raw)) => Ok(raw),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(CrsError::Parse(nom::error::convert_error(input, e)))
        }
        Err(nom::Err::Incomplete(_)) => Err(CrsError::Parse("incomplete input".to_string())),
    }
}

/// Parses a single parameter literal, e.g. from a catalog.
pub fn parse_literal(input: &str) -> Result<ParamValue> {
    match all_consuming(delimited(
        multispace0::<_, nom::error::VerboseError<&str>>,
        literal,
        multispace0,
    ))(input)
    {
        Ok((_, v)) => Ok(v),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(CrsError::Parse(nom::error::convert_error(input, e)))
        }
        Err(nom::Err::Incomplete(_)) => Err(CrsError::Parse("incomplete input".to_string())),
    }
}

// ============================================================================
// Expressions
// ============================================================================

fn expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, RawExpr, E> {
    alt((ensemble, page, call, token))(input)
}

fn keyword_open<'a, E: NomParseError<&'a str>>(
    keyword: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    terminated(tag(keyword), pair(multispace0, char('(')))
}

fn ensemble<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, RawExpr, E> {
    let (input, _) = keyword_open(ENSEMBLE_KEYWORD)(input)?;
    let member = pair(
        ws(string),
        preceded(cut(context("':' after ensemble label", char(':'))), ws(expr)),
    );
    let (input, members) = cut(context(
        "ensemble members",
        delimited(
            ws(char('{')),
            separated_list1(char(','), ws(member)),
            ws(char('}')),
        ),
    ))(input)?;
    let (input, _) = cut(context("closing parenthesis", char(')')))(input)?;
    Ok((input, RawExpr::Ensemble(members)))
}

fn page<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, RawExpr, E> {
    let (input, _) = keyword_open(PAGE_KEYWORD)(input)?;
    let row = delimited(
        ws(char('[')),
        separated_list1(char(','), ws(operand)),
        ws(char(']')),
    );
    let (input, rows) = cut(context(
        "page rows",
        delimited(ws(char('[')), separated_list1(char(','), row), ws(char(']'))),
    ))(input)?;
    let (input, params) = many0(preceded(char(','), ws(param)))(input)?;
    let (input, _) = cut(context("closing parenthesis", char(')')))(input)?;
    Ok((input, RawExpr::Page { rows, params }))
}

fn call<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, RawExpr, E> {
    let (input, name) = terminated(identifier, pair(multispace0, char('(')))(input)?;
    let arg = alt((
        map(param, |(k, v)| Arg::Param(k, v)),
        map(operand, Arg::Operand),
    ));
    let (input, args) = cut(context(
        "call arguments",
        separated_list0(char(','), ws(arg)),
    ))(input)?;
    let (input, _) = cut(context("closing parenthesis", char(')')))(input)?;
    let (input, outputs) = many0(preceded(char('.'), identifier))(input)?;

    let mut operands = Vec::new();
    let mut params = Vec::new();
    for arg in args {
        match arg {
            Arg::Operand(op) => operands.push(op),
            Arg::Param(k, v) => params.push((k, v)),
        }
    }
    let node = RawExpr::Call {
        name: name.to_string(),
        operands,
        params,
    };
    let node = outputs.into_iter().fold(node, |father, name| RawExpr::Output {
        father: Box::new(father),
        name: name.to_string(),
    });
    Ok((input, node))
}

/// A dataset string, `ARG` or `ARG.name`. Bracket groups may hold commas.
fn token<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, RawExpr, E> {
    let bracket = recognize(tuple((char('['), opt(is_not("]")), char(']'))));
    let (input, text) = context(
        "dataset",
        recognize(many1(alt((is_not(TOKEN_STOP), bracket)))),
    )(input)?;
    let node = match text.strip_prefix(PLACEHOLDER_CRS) {
        Some("") => RawExpr::Placeholder,
        Some(rest) if rest.starts_with('.') && is_identifier(&rest[1..]) => RawExpr::Output {
            father: Box::new(RawExpr::Placeholder),
            name: rest[1..].to_string(),
        },
        _ => RawExpr::Token(text.to_string()),
    };
    Ok((input, node))
}

fn operand<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Option<RawExpr>, E> {
    map(expr, |e| match e {
        RawExpr::Token(t) if t == NULL_OPERAND => None,
        other => Some(other),
    })(input)
}

fn param<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, (String, ParamValue), E> {
    let (input, name) = terminated(identifier, pair(multispace0, char('=')))(input)?;
    let (input, value) = cut(context("parameter value", ws(literal)))(input)?;
    Ok((input, (name.to_string(), value)))
}

// ============================================================================
// Literals
// ============================================================================

fn literal<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, ParamValue, E> {
    alt((
        map(string, ParamValue::Str),
        value(ParamValue::Bool(true), tag("true")),
        value(ParamValue::Bool(false), tag("false")),
        number,
        map(
            delimited(
                char('['),
                separated_list0(char(','), ws(literal)),
                cut(context("closing bracket", char(']'))),
            ),
            ParamValue::List,
        ),
    ))(input)
}

/// `'...'` with `\\` and `\'` escapes.
fn string<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    delimited(
        char('\''),
        map(
            opt(escaped_transform(
                none_of("'\\"),
                '\\',
                alt((value('\\', char('\\')), value('\'', char('\'')))),
            )),
            Option::unwrap_or_default,
        ),
        char('\''),
    )(input)
}

fn number<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, ParamValue, E> {
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit0)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;
    let parsed = if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(ParamValue::Float)
    } else {
        text.parse::<i64>().ok().map(ParamValue::Int)
    };
    match parsed {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Error(E::from_error_kind(input, ErrorKind::Float))),
    }
}

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn ws<'a, O, E: NomParseError<&'a str>, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

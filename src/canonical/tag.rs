//! Struct-tag strings: `json:"id,omitempty" sqlx:"ID"`.

use std::collections::BTreeMap;

use nom::{
    IResult,
    bytes::complete::{escaped, is_not, take_while1},
    character::complete::{char, multispace0, multispace1, one_of},
    combinator::{all_consuming, map, opt},
    multi::separated_list0,
    sequence::{delimited, separated_pair},
};

fn key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')(input)
}

fn value(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('"'), opt(escaped(is_not("\"\\"), '\\', one_of("\"\\"))), char('"')),
        |v: Option<&str>| v.unwrap_or_default().replace("\\\"", "\""),
    )(input)
}

fn pair(input: &str) -> IResult<&str, (&str, String)> {
    separated_pair(key, char(':'), value)(input)
}

/// Parse a tag into its key/value pairs; `None` when it is not in tag form.
pub fn parse_tag(tag: &str) -> Option<BTreeMap<String, String>> {
    let tag = tag.trim().trim_matches('`');
    if tag.is_empty() {
        return None;
    }
    let (_, pairs) = all_consuming(delimited(
        multispace0,
        separated_list0(multispace1, pair),
        multispace0,
    ))(tag)
    .ok()?;
    if pairs.is_empty() {
        return None;
    }
    Some(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

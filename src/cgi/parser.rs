//! Parsers for CGI/1.1 responses
//!
//! The header parsers are streaming: on a header block that hasn't been
//! fully written yet they answer `Incomplete`, so they can be run on a
//! script's output as it trickles in.

use crate::cgi::{Header, Status};

use nom::IResult;
use nom::bytes::complete::take_while_m_n;
use nom::bytes::streaming::{tag, take_till, take_while, take_while1};
use nom::character::is_digit;
use nom::character::complete::space1;
use nom::character::streaming::line_ending;
use nom::combinator::{all_consuming, map, map_res, opt, rest};
use nom::multi::many0;
use nom::sequence::{preceded, terminated, tuple};

use std::str::{self, FromStr};

fn cr_or_lf(x: u8) -> bool {
    x == b'\n' || x == b'\r'
}

fn lwsp(x: u8) -> bool {
    x == b' ' || x == b'\t'
}

fn is_name_byte(x: u8) -> bool {
    x > 0x20 && x < 0x7f && x != b':'
}

fn trim_trailing_lwsp(mut content: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = content.split_last() {
        if !lwsp(last) {
            break;
        }
        content = rest;
    }
    content
}

/// One `Name: content` line, terminated by CRLF or a bare LF.
pub fn header(input: &[u8]) -> IResult<&[u8], Header> {
    map(
        tuple((
            take_while1(is_name_byte),
            tag(":"),
            take_while(lwsp),
            terminated(take_till(cr_or_lf), line_ending),
        )),
        |(name, _, _, content): (&[u8], _, _, &[u8])| Header {
            name: Vec::from(name),
            content: Vec::from(trim_trailing_lwsp(content)),
        })(input)
}

/// The whole header block up to and including the empty line. What's left
/// over is the start of the body.
pub fn headers(input: &[u8]) -> IResult<&[u8], Vec<Header>> {
    terminated(many0(header), line_ending)(input)
}

fn code(input: &[u8]) -> IResult<&[u8], u16> {
    map_res(
        map_res(take_while_m_n(3, 3, is_digit), str::from_utf8),
        FromStr::from_str)(input)
}

/// The content of a `Status:` header: a three-digit code and an optional
/// reason phrase.
pub fn status(input: &[u8]) -> IResult<&[u8], Status> {
    all_consuming(map(
        tuple((code, opt(preceded(space1, rest)))),
        |(code, phrase): (u16, Option<&[u8]>)| Status {
            code: code,
            reason_phrase: Vec::from(phrase.unwrap_or(&b""[..])),
        }))(input)
}

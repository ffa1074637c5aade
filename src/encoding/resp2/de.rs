use bytes::Bytes;
use nom::{
    bytes::streaming::{tag, take, take_until},
    combinator::map,
    error::{Error, ErrorKind},
    IResult,
};

use super::Reply;

// Upper bound for preallocating array replies; the length prefix is untrusted.
const MAX_PREALLOC: usize = 1024;
// Redis' own proto-max-bulk-len.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_DEPTH: usize = 32;

pub fn reply(input: &[u8]) -> IResult<&[u8], Reply> {
    nested(input, 0)
}

fn nested(input: &[u8], depth: usize) -> IResult<&[u8], Reply> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)));
    }
    let (rest, kind) = take(1usize)(input)?;

    match kind[0] {
        b'+' => map(text, Reply::Simple)(rest),
        b'-' => map(text, Reply::Error)(rest),
        b':' => map(number, Reply::Integer)(rest),
        b'$' => bulk(rest),
        b'*' => array(rest, depth),
        _ => Err(nom::Err::Failure(Error::new(input, ErrorKind::Tag))),
    }
}

fn line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, l) = take_until("\r\n")(input)?;
    let (input, _) = separator(input)?;
    Ok((input, l))
}

fn separator(input: &[u8]) -> IResult<&[u8], ()> {
    let (input, _) = tag("\r\n")(input)?;
    Ok((input, ()))
}

fn number(input: &[u8]) -> IResult<&[u8], i64> {
    let (rest, l) = line(input)?;
    let n = std::str::from_utf8(l)
        .ok()
        .and_then(|it| it.parse().ok())
        .ok_or_else(|| nom::Err::Failure(Error::new(input, ErrorKind::Digit)))?;

    Ok((rest, n))
}

fn text(input: &[u8]) -> IResult<&[u8], String> {
    let (rest, l) = line(input)?;
    let s = std::str::from_utf8(l)
        .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Verify)))?;

    Ok((rest, s.to_owned()))
}

fn bulk(input: &[u8]) -> IResult<&[u8], Reply> {
    let (rest, len) = number(input)?;
    if len < 0 {
        return Ok((rest, Reply::Bulk(None)));
    }
    if len > MAX_BULK_LEN {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)));
    }

    let (input, data) = take(len as usize)(rest)?;
    let (input, _) = separator(input)?;

    Ok((input, Reply::Bulk(Some(Bytes::copy_from_slice(data)))))
}

fn array(input: &[u8], depth: usize) -> IResult<&[u8], Reply> {
    let (mut input, len) = number(input)?;
    if len < 0 {
        return Ok((input, Reply::Array(None)));
    }

    let mut items = Vec::with_capacity((len as usize).min(MAX_PREALLOC));
    for _ in 0..len {
        let (rest, item) = nested(input, depth + 1)?;
        items.push(item);
        input = rest;
    }

    Ok((input, Reply::Array(Some(items))))
}

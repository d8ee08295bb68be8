use nom::{
    bytes::complete::{tag, tag_no_case, take_till},
    combinator::{map, opt},
    sequence::{preceded, terminated, tuple},
    IResult,
};

/// An image payload, with the `data:<mime>;base64,` header split off when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime: Option<&'a str>,
    pub base64: bool,
    pub payload: &'a str,
}

fn header(input: &str) -> IResult<&str, (Option<&str>, bool)> {
    terminated(
        preceded(
            tag_no_case("data:"),
            tuple((
                map(take_till(|c| c == ';' || c == ','), |mime: &str| {
                    Some(mime).filter(|mime| !mime.is_empty())
                }),
                map(opt(tag_no_case(";base64")), |flag| flag.is_some()),
            )),
        ),
        tag(","),
    )(input)
}

/// Split an optional data-URL header off `input`.
///
/// Anything that is not a well-formed header but still contains a comma is
/// treated as `<prefix>,<payload>`, so clients that send a custom prefix keep working.
/// The payload is everything after the first comma. Base64 never contains a
/// comma, so a payload that does is left intact and fails to decode later.
pub fn parse(input: &str) -> DataUrl<'_> {
    match header(input) {
        Ok((payload, (mime, base64))) => DataUrl {
            mime,
            base64,
            payload,
        },
        Err(_) => DataUrl {
            mime: None,
            base64: true,
            payload: input.split_once(',').map_or(input, |(_, payload)| payload),
        },
    }
}

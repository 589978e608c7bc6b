// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Message ⇄ stream header mapping.
//!
//! - `Verb`: exactly one value, the verb's wire name.
//! - `Args`: at most one value, URL-safe base64 of the `data` encoding of
//!   `{"args": [...]}`. Absent means no arguments.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use beam::data::{self, DataMap};
use beam::{BeamError, Message, Result, Verb};

use crate::frame::Headers;

pub const VERB_HEADER: &str = "Verb";
pub const ARGS_HEADER: &str = "Args";
const ARGS_KEY: &str = "args";

pub fn encode_headers(msg: &Message) -> Headers {
    let mut headers = Headers::new();
    headers.insert(VERB_HEADER.to_string(), vec![msg.verb.as_str().to_string()]);
    if !msg.args.is_empty() {
        let payload = DataMap::from([(ARGS_KEY.to_string(), msg.args.clone())]);
        headers.insert(
            ARGS_HEADER.to_string(),
            vec![URL_SAFE.encode(data::encode(&payload))],
        );
    }
    headers
}

pub fn decode_headers(headers: &Headers) -> Result<(Verb, Vec<String>)> {
    let verb = match headers.get(VERB_HEADER).map(Vec::as_slice) {
        Some([name]) => name.parse::<Verb>()?,
        Some([]) | None => return Err(BeamError::protocol("missing Verb header")),
        Some(_) => return Err(BeamError::protocol("multiple Verb headers")),
    };

    let args = match headers.get(ARGS_HEADER).map(Vec::as_slice) {
        None | Some([]) => Vec::new(),
        Some([encoded]) => decode_args(encoded)?,
        Some(_) => return Err(BeamError::protocol("multiple Args headers")),
    };
    Ok((verb, args))
}

fn decode_args(encoded: &str) -> Result<Vec<String>> {
    let raw = URL_SAFE
        .decode(encoded)
        .map_err(|err| BeamError::protocol(format!("malformed Args header: {}", err)))?;
    let text = String::from_utf8(raw)
        .map_err(|_| BeamError::protocol("malformed Args header: not UTF-8"))?;
    let mut map = data::decode(&text)
        .map_err(|err| BeamError::protocol(format!("malformed Args header: {}", err)))?;
    Ok(map.remove(ARGS_KEY).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_with_separators_and_nul_survive() {
        let msg = Message::new(Verb::Ls).with_args(["x", "y\0z", "a,b:c", ""]);
        let headers = encode_headers(&msg);
        assert_eq!(headers[VERB_HEADER], vec!["ls"]);

        let (verb, args) = decode_headers(&headers).unwrap();
        assert_eq!(verb, Verb::Ls);
        assert_eq!(args, msg.args);
    }

    #[test]
    fn test_no_args_means_no_args_header() {
        let headers = encode_headers(&Message::new(Verb::Start));
        assert!(!headers.contains_key(ARGS_HEADER));
        assert_eq!(decode_headers(&headers).unwrap(), (Verb::Start, vec![]));
    }

    #[test]
    fn test_verb_header_must_be_single_and_known() {
        let missing = Headers::new();
        let doubled = Headers::from([(VERB_HEADER.to_string(), vec!["ls".into(), "get".into()])]);
        let unknown = Headers::from([(VERB_HEADER.to_string(), vec!["reboot".into()])]);
        for headers in [missing, doubled, unknown] {
            assert!(matches!(
                decode_headers(&headers),
                Err(BeamError::Protocol(_))
            ));
        }
    }

    #[test]
    fn test_args_header_must_be_single_and_well_formed() {
        let base = |args: Vec<String>| {
            Headers::from([
                (VERB_HEADER.to_string(), vec!["set".to_string()]),
                (ARGS_HEADER.to_string(), args),
            ])
        };
        let doubled = base(vec!["a".into(), "b".into()]);
        let not_base64 = base(vec!["***".into()]);
        let not_data = base(vec![URL_SAFE.encode("hello")]);
        for headers in [doubled, not_base64, not_data] {
            assert!(matches!(
                decode_headers(&headers),
                Err(BeamError::Protocol(_))
            ));
        }
    }
}

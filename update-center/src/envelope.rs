// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extraction of raw JSON from the two historical transport envelopes.
//!
//! Update sites publish their catalogs wrapped either as JSONP
//! (`callback({...});`) or as an HTML page that `postMessage`s the payload to
//! the embedding frame. Both formats date back to browser-based retrieval;
//! the server-side fetch path has to strip them.

use crate::errors::EnvelopeError;

const POST_MESSAGE_PREAMBLE: &str = "window.parent.postMessage(JSON.stringify(";
const POST_MESSAGE_SUFFIX: &str = "),'*');";

/// Extract the `{...}` region of a JSONP document: everything from the first
/// `{` through the last `}`, inclusive.
pub fn extract_jsonp(body: &str) -> Result<&str, EnvelopeError> {
    let start = body.find('{');
    let end = body.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok(&body[start..=end]),
        _ => Err(EnvelopeError::MalformedJsonp),
    }
}

/// Extract the payload of an HTML-postMessage document: the trimmed region
/// between the literal `postMessage(JSON.stringify(` preamble and the
/// literal `),'*');` suffix.
pub fn extract_post_message(body: &str) -> Result<&str, EnvelopeError> {
    let start = body.find(POST_MESSAGE_PREAMBLE);
    let end = body.rfind(POST_MESSAGE_SUFFIX);
    match (start, end) {
        (Some(start), Some(end)) if end > start => {
            Ok(body[start + POST_MESSAGE_PREAMBLE.len()..end].trim())
        }
        _ => Err(EnvelopeError::MalformedPostMessage),
    }
}

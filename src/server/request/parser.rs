//! Request parsing utilities.

use std::borrow::Cow;

/// Percent-decode a path segment. Unlike form decoding, `+` is a
/// literal character here.
#[inline]
pub fn decode_path_segment(s: &str) -> Cow<'_, str> {
    if s.contains('%') {
        Cow::Owned(
            percent_encoding::percent_decode_str(s)
                .decode_utf8_lossy()
                .into_owned(),
        )
    } else {
        Cow::Borrowed(s)
    }
}

/// Fast percent decode for query and form data - returns Cow to avoid
/// allocation when no decoding needed. `+` decodes to a space.
#[inline]
pub fn fast_percent_decode(s: &str) -> Cow<'_, str> {
    if s.contains('%') || s.contains('+') {
        let replaced = s.replace('+', " ");
        Cow::Owned(
            percent_encoding::percent_decode_str(&replaced)
                .decode_utf8_lossy()
                .into_owned(),
        )
    } else {
        Cow::Borrowed(s)
    }
}

/// Parse a query string or urlencoded form body into key-value pairs.
///
/// Pairs keep their wire order; repeated keys are preserved as repeats.
#[inline]
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    let pair_count = query.matches('&').count() + 1;
    let mut params = Vec::with_capacity(pair_count.min(16));

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }

        let (key, value) = match pair.find('=') {
            Some(pos) => (&pair[..pos], &pair[pos + 1..]),
            None => (pair, ""),
        };

        if !key.is_empty() {
            params.push((
                fast_percent_decode(key).into_owned(),
                fast_percent_decode(value).into_owned(),
            ));
        }
    }

    params
}

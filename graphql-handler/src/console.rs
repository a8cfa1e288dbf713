//! The interactive in-browser query console, served in place of JSON for
//! plain browser navigations.

use http::header::ACCEPT;
use http::request::Parts;
use http::HeaderMap;
use mediatype::names::APPLICATION;
use mediatype::names::HTML;
use mediatype::names::JSON;
use mediatype::names::TEXT;
use mediatype::MediaTypeList;
use mediatype::Name;

/// Error raised when the console page cannot be rendered.
#[derive(Debug, thiserror::Error)]
#[error("failed to render console page: {0}")]
pub(crate) struct ConsoleRenderError(#[from] serde_json::Error);

/// True when the request should be answered with the console page instead of
/// JSON: the client did not ask for raw output, its `Accept` header does not
/// list `application/json`, and it does list `text/html`.
pub(crate) fn accepts_console(parts: &Parts) -> bool {
    !has_raw_param(parts.uri.query())
        && !accepts(&parts.headers, APPLICATION, JSON)
        && accepts(&parts.headers, TEXT, HTML)
}

/// The bare presence of a `raw` key opts out of the console; `?raw` and
/// `?raw=1` both count.
fn has_raw_param(query: Option<&str>) -> bool {
    let Some(query) = query else { return false };
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| pairs.iter().any(|(key, _)| key == "raw"))
        .unwrap_or(false)
}

fn accepts(headers: &HeaderMap, ty: Name<'static>, subty: Name<'static>) -> bool {
    headers.get_all(ACCEPT).iter().any(|value| {
        value
            .to_str()
            .map(|accept| {
                MediaTypeList::new(accept).any(|media| {
                    media
                        .map(|media| media.ty == ty && media.subty == subty)
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    })
}

/// Render the console page for the configured heading.
///
/// The template is fixed: it loads the console application from a CDN and
/// leaves all query/variable/result state to the client. Only the page
/// title is interpolated.
pub(crate) fn page_content(title: &str) -> Result<Vec<u8>, ConsoleRenderError> {
    const TEMPLATE: &str = include_str!("../templates/console_index.html");
    let settings = serde_json::to_string(&serde_json::json!({
        "setTitle": false,
        "settings": { "request.credentials": "same-origin" },
    }))?;
    Ok(TEMPLATE
        .replace("{{CONSOLE_SETTINGS}}", &settings)
        .replace("{{CONSOLE_TITLE}}", &escape_html(title))
        .into_bytes())
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

use std::collections::HashMap;
use std::convert::Infallible;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::Method;
use mediatype::names::APPLICATION;
use mediatype::names::BOUNDARY;
use mediatype::names::FORM_DATA;
use mediatype::names::MULTIPART;
use mediatype::MediaType;
use mediatype::ReadParams;
use multimap::MultiMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use super::Object;

/// A GraphQL `Request` as extracted from an incoming HTTP request.
///
/// Extraction never fails: a request from which no usable operation can be
/// read resolves to the all-default record, and the downstream engine is
/// left to reject it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Request {
    /// The GraphQL operation (e.g., query, mutation) string.
    ///
    /// For historical purposes, the term "query" is commonly used to refer to
    /// *any* GraphQL operation which might be, e.g., a `mutation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// The (optional) GraphQL operation name.
    ///
    /// When specified, this name must match the name of an operation in the
    /// GraphQL document. When excluded, there must exist only a single
    /// operation in the GraphQL document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// The (optional) GraphQL variables in the form of a JSON object.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub variables: Object,

    /// Uploaded file parts of a multipart request, keyed by form field name.
    ///
    /// Only the multipart extraction path populates this; it never appears
    /// in JSON.
    #[serde(skip)]
    pub files: MultiMap<String, UploadedFile>,
}

// NOTE: this deserialize helper is used to transform `null` to Default::default()
fn deserialize_null_default<'de, D, T: Default + Deserialize<'de>>(
    deserializer: D,
) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Option<T>>::deserialize(deserializer).map(|x| x.unwrap_or_default())
}

/// One uploaded file captured from a multipart request part, buffered in
/// memory.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedFile {
    /// The file name sent by the client.
    pub file_name: String,
    /// The declared media type of the part, if any.
    pub content_type: Option<mime::Mime>,
    /// The file contents.
    pub data: Bytes,
}

#[buildstructor::buildstructor]
impl Request {
    /// Returns a builder that builds a GraphQL [`Request`] from its
    /// components. All parts are optional; an all-default request is valid
    /// (if useless to an engine).
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            files: MultiMap::new(),
        }
    }

    /// Extract a GraphQL request from the pieces of an HTTP request.
    ///
    /// Sources are tried in order, first match wins:
    ///
    /// 1. a non-empty `query` key in the URL query string, for any method;
    /// 2. for POST requests only, the body according to `Content-Type`:
    ///    `application/graphql` (raw query text), urlencoded forms,
    ///    `multipart/form-data`, and JSON for everything else, including
    ///    requests without a content type.
    ///
    /// Unreadable or malformed payloads resolve to the default record
    /// instead of an error; `multipart_limit` bounds how many body bytes the
    /// multipart parser will accept.
    pub async fn from_http(parts: &Parts, body: Bytes, multipart_limit: u64) -> Request {
        if let Some(request) = parts.uri.query().and_then(Self::from_urlencoded_form) {
            return request;
        }

        if parts.method != Method::POST {
            return Request::default();
        }

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| MediaType::parse(header).ok());

        match content_type {
            Some(mime) if mime.ty == APPLICATION && mime.subty.as_str() == "graphql" => {
                Self::from_raw_query(&body)
            }
            Some(mime)
                if mime.ty == APPLICATION && mime.subty.as_str() == "x-www-form-urlencoded" =>
            {
                std::str::from_utf8(&body)
                    .ok()
                    .and_then(Self::from_urlencoded_form)
                    .unwrap_or_default()
            }
            Some(mime) if mime.ty == MULTIPART && mime.subty == FORM_DATA => {
                let Some(boundary) = mime.get_param(BOUNDARY) else {
                    tracing::debug!("ignoring multipart request without a boundary");
                    return Request::default();
                };
                Self::from_multipart_form(body, boundary.to_string(), multipart_limit)
                    .await
                    .unwrap_or_default()
            }
            // `application/json` and any unrecognized or absent content type.
            _ => serde_json::from_slice(&body).unwrap_or_else(|err| {
                tracing::debug!(%err, "ignoring request body that does not decode as JSON");
                Request::default()
            }),
        }
    }

    /// Treat the entire body as the operation source text
    /// (`application/graphql`).
    fn from_raw_query(body: &[u8]) -> Request {
        let query = String::from_utf8_lossy(body);
        if query.is_empty() {
            return Request::default();
        }
        Request {
            query: Some(query.into_owned()),
            ..Default::default()
        }
    }

    /// Extract request fields from an URL query string or an urlencoded form
    /// body. `None` when the data does not decode or carries no usable
    /// `query` value.
    fn from_urlencoded_form(form: &str) -> Option<Request> {
        let values = serde_urlencoded::from_str::<HashMap<String, String>>(form)
            .map_err(|err| tracing::debug!(%err, "ignoring unparseable form data"))
            .ok()?;
        Self::from_form_values(&values)
    }

    /// Shared field extraction for the urlencoded and multipart paths:
    /// `query` (required, non-empty), `operationName`, and JSON-encoded
    /// `variables`.
    fn from_form_values(values: &HashMap<String, String>) -> Option<Request> {
        let query = values.get("query").filter(|query| !query.is_empty())?;
        let variables = values
            .get("variables")
            .map(|raw| {
                serde_json::from_str(raw).unwrap_or_else(|err| {
                    tracing::debug!(%err, "ignoring malformed JSON in `variables` form value");
                    Object::default()
                })
            })
            .unwrap_or_default();
        Some(Request {
            query: Some(query.clone()),
            operation_name: values.get("operationName").cloned(),
            variables,
            files: MultiMap::new(),
        })
    }

    /// Extract request fields and uploaded files from a multipart form body.
    ///
    /// `None` on any multipart error (including a body larger than `limit`)
    /// or when no usable `query` field is present; uploaded files are
    /// dropped along with the rest of the form in that case.
    async fn from_multipart_form(body: Bytes, boundary: String, limit: u64) -> Option<Request> {
        let constraints = multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().whole_stream(limit));
        let stream = futures::stream::once(async move { Ok::<_, Infallible>(body) });
        let mut form = multer::Multipart::with_constraints(stream, boundary, constraints);

        let mut values = HashMap::new();
        let mut files = MultiMap::new();
        loop {
            let field = match form.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(%err, "ignoring unparseable multipart form data");
                    return None;
                }
            };
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            // A part with a file name is an upload; anything else is a form
            // value.
            if let Some(file_name) = field.file_name().map(str::to_owned) {
                let content_type = field.content_type().cloned();
                match field.bytes().await {
                    Ok(data) => files.insert(
                        name,
                        UploadedFile {
                            file_name,
                            content_type,
                            data,
                        },
                    ),
                    Err(err) => {
                        tracing::debug!(%err, "ignoring multipart form data with unreadable file part");
                        return None;
                    }
                }
            } else {
                match field.text().await {
                    Ok(text) => {
                        values.insert(name, text);
                    }
                    Err(err) => {
                        tracing::debug!(%err, "ignoring multipart form data with unreadable field");
                        return None;
                    }
                }
            }
        }

        let mut request = Self::from_form_values(&values)?;
        request.files = files;
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json as bjson;
    use test_log::test;

    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn http_parts(method: Method, uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut request = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.body(()).unwrap().into_parts().0
    }

    #[test(tokio::test)]
    async fn query_string_wins_over_post_body() {
        let parts = http_parts(
            Method::POST,
            "/graphql?query=%7B%20hero%20%7D",
            &[("content-type", "application/json")],
        );
        let body = Bytes::from(r#"{"query":"{ villain }"}"#);

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request.query.as_deref(), Some("{ hero }"));
    }

    #[test(tokio::test)]
    async fn query_string_fields_are_extracted() {
        let parts = http_parts(
            Method::GET,
            "/graphql?query=%7B%20hero%20%7D&operationName=Hero&variables=%7B%22episode%22%3A%22EMPIRE%22%7D",
            &[],
        );

        let request = Request::from_http(&parts, Bytes::new(), MIB).await;

        assert_eq!(
            request,
            Request::builder()
                .query("{ hero }")
                .operation_name("Hero")
                .variables(bjson!({ "episode": "EMPIRE" }).as_object().unwrap().clone())
                .build()
        );
    }

    #[test(tokio::test)]
    async fn malformed_variables_in_query_string_are_ignored() {
        let parts = http_parts(
            Method::GET,
            "/graphql?query=%7B%20hero%20%7D&variables=not-json",
            &[],
        );

        let request = Request::from_http(&parts, Bytes::new(), MIB).await;

        assert_eq!(request.query.as_deref(), Some("{ hero }"));
        assert!(request.variables.is_empty());
    }

    #[test(tokio::test)]
    async fn empty_query_string_value_is_not_usable() {
        let parts = http_parts(Method::GET, "/graphql?query=", &[]);

        let request = Request::from_http(&parts, Bytes::new(), MIB).await;

        assert_eq!(request, Request::default());
    }

    #[test(tokio::test)]
    async fn get_without_parameters_yields_the_default_record() {
        let parts = http_parts(Method::GET, "/graphql", &[]);

        let request = Request::from_http(&parts, Bytes::new(), MIB).await;

        assert_eq!(request, Request::default());
    }

    #[test(tokio::test)]
    async fn non_post_bodies_are_ignored() {
        let parts = http_parts(
            Method::PUT,
            "/graphql",
            &[("content-type", "application/json")],
        );
        let body = Bytes::from(r#"{"query":"{ hero }"}"#);

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request, Request::default());
    }

    #[test(tokio::test)]
    async fn graphql_content_type_takes_the_raw_body() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "application/graphql")],
        );
        let body = Bytes::from("query Hero { hero { name } }");

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request.query.as_deref(), Some("query Hero { hero { name } }"));
        assert_eq!(request.operation_name, None);
        assert!(request.variables.is_empty());
    }

    #[test(tokio::test)]
    async fn content_type_parameters_are_ignored() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "application/graphql; charset=utf-8")],
        );
        let body = Bytes::from("{ hero }");

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request.query.as_deref(), Some("{ hero }"));
    }

    #[test(tokio::test)]
    async fn urlencoded_form_body_is_extracted() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "application/x-www-form-urlencoded")],
        );
        let body = Bytes::from(
            "query=%7B%20hero%20%7D&operationName=Hero&variables=%7B%22episode%22%3A%22EMPIRE%22%7D",
        );

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(
            request,
            Request::builder()
                .query("{ hero }")
                .operation_name("Hero")
                .variables(bjson!({ "episode": "EMPIRE" }).as_object().unwrap().clone())
                .build()
        );
    }

    #[test(tokio::test)]
    async fn urlencoded_form_without_query_yields_the_default_record() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "application/x-www-form-urlencoded")],
        );
        let body = Bytes::from("operationName=Hero");

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request, Request::default());
    }

    #[test(tokio::test)]
    async fn json_body_is_decoded() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "application/json")],
        );
        let body = Bytes::from(
            r#"{"query":"{ hero }","operationName":"Hero","variables":{"episode":"EMPIRE"}}"#,
        );

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(
            request,
            Request::builder()
                .query("{ hero }")
                .operation_name("Hero")
                .variables(bjson!({ "episode": "EMPIRE" }).as_object().unwrap().clone())
                .build()
        );
    }

    #[test(tokio::test)]
    async fn json_body_with_null_variables_is_decoded() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "application/json")],
        );
        let body = Bytes::from(r#"{"query":"{ hero }","variables":null}"#);

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request.query.as_deref(), Some("{ hero }"));
        assert!(request.variables.is_empty());
    }

    #[test(tokio::test)]
    async fn malformed_json_body_yields_the_default_record() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "application/json")],
        );
        let body = Bytes::from("{ this is not json");

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request, Request::default());
    }

    #[test(tokio::test)]
    async fn missing_content_type_defaults_to_json() {
        let parts = http_parts(Method::POST, "/graphql", &[]);
        let body = Bytes::from(r#"{"query":"{ hero }"}"#);

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request.query.as_deref(), Some("{ hero }"));
    }

    #[test(tokio::test)]
    async fn unrecognized_content_type_defaults_to_json() {
        let parts = http_parts(Method::POST, "/graphql", &[("content-type", "text/plain")]);
        let body = Bytes::from(r#"{"query":"{ hero }"}"#);

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request.query.as_deref(), Some("{ hero }"));
    }

    fn multipart_body() -> Bytes {
        Bytes::from(concat!(
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"query\"\r\n\r\n",
            "mutation Upload($file: Upload!) { upload(file: $file) }\r\n",
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"variables\"\r\n\r\n",
            "{\"file\":null}\r\n",
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "hello world\r\n",
            "--boundary--\r\n",
        ))
    }

    #[test(tokio::test)]
    async fn multipart_form_extracts_fields_and_files() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "multipart/form-data; boundary=boundary")],
        );

        let request = Request::from_http(&parts, multipart_body(), MIB).await;

        assert_eq!(
            request.query.as_deref(),
            Some("mutation Upload($file: Upload!) { upload(file: $file) }")
        );
        assert_eq!(
            request.variables,
            bjson!({ "file": null }).as_object().unwrap().clone()
        );
        let uploaded = request.files.get_vec("file").expect("file part captured");
        assert_eq!(
            uploaded,
            &[UploadedFile {
                file_name: "hello.txt".to_owned(),
                content_type: Some(mime::TEXT_PLAIN),
                data: Bytes::from("hello world"),
            }]
        );
    }

    #[test(tokio::test)]
    async fn multipart_form_without_query_yields_the_default_record() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "multipart/form-data; boundary=boundary")],
        );
        let body = Bytes::from(concat!(
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n\r\n",
            "hello world\r\n",
            "--boundary--\r\n",
        ));

        let request = Request::from_http(&parts, body, MIB).await;

        assert_eq!(request, Request::default());
    }

    #[test(tokio::test)]
    async fn multipart_form_over_the_size_limit_yields_the_default_record() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "multipart/form-data; boundary=boundary")],
        );

        let request = Request::from_http(&parts, multipart_body(), 16).await;

        assert_eq!(request, Request::default());
    }

    #[test(tokio::test)]
    async fn multipart_form_without_boundary_yields_the_default_record() {
        let parts = http_parts(
            Method::POST,
            "/graphql",
            &[("content-type", "multipart/form-data")],
        );

        let request = Request::from_http(&parts, multipart_body(), MIB).await;

        assert_eq!(request, Request::default());
    }
}

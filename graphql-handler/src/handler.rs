//! Wires request resolution, execution, and response rendering into a
//! single per-request HTTP entry point.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::Poll;

use axum::body::Body;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::HeaderValue;
use http::StatusCode;

use crate::body;
use crate::console;
use crate::execution;
use crate::execution::Executable;
use crate::execution::ExecutionParams;
use crate::graphql;
use crate::graphql::Object;

static APPLICATION_JSON_UTF_8_HEADER_VALUE: HeaderValue =
    HeaderValue::from_static("application/json; charset=utf-8");
static TEXT_HTML_UTF_8_HEADER_VALUE: HeaderValue =
    HeaderValue::from_static("text/html; charset=utf-8");

/// Maximum number of body bytes accepted from a multipart request unless
/// configured otherwise.
const DEFAULT_MULTIPART_LIMIT: u64 = 10 * 1024 * 1024;

/// Produces a per-request root object for field resolution, from the request
/// context, the request head, and the resolved GraphQL request.
pub type RootObjectFn<C> = Arc<dyn Fn(&C, &Parts, &graphql::Request) -> Object + Send + Sync>;

/// Runs after execution and before rendering; may rewrite the response.
pub type PreResponseFn<C> = Arc<dyn Fn(&ExecutionParams<C>, &mut graphql::Response) + Send + Sync>;

/// Observes a finished exchange: the execution parameters, the final
/// response, and the exact bytes written to the wire.
pub type ResultCallbackFn<C> =
    Arc<dyn Fn(&ExecutionParams<C>, &graphql::Response, &[u8]) + Send + Sync>;

/// Rewrites one engine-reported error before serialization.
pub type FormatErrorFn = Arc<dyn Fn(graphql::Error) -> graphql::Error + Send + Sync>;

/// The HTTP entry point for a single schema.
///
/// A `Handler` owns no per-request state: the schema reference and the
/// configuration are fixed at construction and shared read-only across
/// requests, so one handler serves any number of concurrent requests.
pub struct Handler<S: Executable> {
    schema: Arc<S>,
    title: String,
    pretty: bool,
    console: bool,
    multipart_limit: u64,
    root_object_fn: Option<RootObjectFn<S::Context>>,
    pre_response_fn: Option<PreResponseFn<S::Context>>,
    result_callback_fn: Option<ResultCallbackFn<S::Context>>,
    format_error_fn: Option<FormatErrorFn>,
}

// Not derived: a derive would bound `S: Clone`, but only the `Arc` is cloned.
impl<S: Executable> Clone for Handler<S> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            title: self.title.clone(),
            pretty: self.pretty,
            console: self.console,
            multipart_limit: self.multipart_limit,
            root_object_fn: self.root_object_fn.clone(),
            pre_response_fn: self.pre_response_fn.clone(),
            result_callback_fn: self.result_callback_fn.clone(),
            format_error_fn: self.format_error_fn.clone(),
        }
    }
}

#[buildstructor::buildstructor]
impl<S: Executable> Handler<S> {
    /// Returns a builder that builds a [`Handler`].
    ///
    /// `schema` is the only required component. Optional components:
    ///
    /// * `.title(impl Into<String>)` — console page heading, defaults to
    ///   "GraphQL Console".
    /// * `.pretty(bool)` — indent JSON output, defaults to `true`.
    /// * `.console(bool)` — serve the in-browser console to browser
    ///   navigations, defaults to `true`.
    /// * `.multipart_limit(u64)` — maximum body bytes accepted from a
    ///   multipart request, defaults to 10 MiB.
    /// * `.root_object_fn(RootObjectFn)`, `.pre_response_fn(PreResponseFn)`,
    ///   `.result_callback_fn(ResultCallbackFn)`,
    ///   `.format_error_fn(FormatErrorFn)` — per-request hooks, all off by
    ///   default.
    #[builder(visibility = "pub")]
    fn new(
        schema: Arc<S>,
        title: Option<String>,
        pretty: Option<bool>,
        console: Option<bool>,
        multipart_limit: Option<u64>,
        root_object_fn: Option<RootObjectFn<S::Context>>,
        pre_response_fn: Option<PreResponseFn<S::Context>>,
        result_callback_fn: Option<ResultCallbackFn<S::Context>>,
        format_error_fn: Option<FormatErrorFn>,
    ) -> Self {
        Self {
            schema,
            title: title.unwrap_or_else(|| "GraphQL Console".to_owned()),
            pretty: pretty.unwrap_or(true),
            console: console.unwrap_or(true),
            multipart_limit: multipart_limit.unwrap_or(DEFAULT_MULTIPART_LIMIT),
            root_object_fn,
            pre_response_fn,
            result_callback_fn,
            format_error_fn,
        }
    }
}

impl<S: Executable> Handler<S> {
    /// Handle one request with a default context.
    pub async fn handle(&self, request: http::Request<Body>) -> http::Response<Body>
    where
        S::Context: Default,
    {
        self.handle_with_context(S::Context::default(), request)
            .await
    }

    /// Handle one request with a caller-supplied context.
    ///
    /// This never fails: unreadable payloads degrade to an empty GraphQL
    /// request, and execution failures travel inside the JSON body with
    /// HTTP 200. The only non-200 outcome is a 500 when the console page
    /// cannot be rendered.
    pub async fn handle_with_context(
        &self,
        context: S::Context,
        request: http::Request<Body>,
    ) -> http::Response<Body> {
        let (parts, request_body) = request.into_parts();
        let request_body = match body::into_bytes(request_body).await {
            Ok(request_body) => request_body,
            Err(err) => {
                tracing::debug!(%err, "failed to read request body");
                Bytes::new()
            }
        };

        let request = graphql::Request::from_http(&parts, request_body, self.multipart_limit).await;

        let root_object = self
            .root_object_fn
            .as_ref()
            .map(|build_root| build_root(&context, &parts, &request));
        let params = ExecutionParams {
            query: request.query.clone().unwrap_or_default(),
            operation_name: request.operation_name.clone(),
            variables: request.variables.clone(),
            root_object,
            context,
        };

        let mut response =
            execution::execute(self.schema.as_ref(), &params, self.format_error_fn.as_deref());
        if let Some(pre_response) = &self.pre_response_fn {
            pre_response(&params, &mut response);
        }

        if self.console && console::accepts_console(&parts) {
            return match console::page_content(&self.title) {
                Ok(page) => http::Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, TEXT_HTML_UTF_8_HEADER_VALUE.clone())
                    .body(Body::from(page))
                    .unwrap(),
                Err(err) => {
                    tracing::error!(%err, "failed to render console page");
                    http::Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Body::from(err.to_string()))
                        .unwrap()
                }
            };
        }

        let serialized = if self.pretty {
            serde_json::to_vec_pretty(&response)
        } else {
            serde_json::to_vec(&response)
        };
        let serialized = match serialized {
            Ok(serialized) => Bytes::from(serialized),
            Err(err) => {
                tracing::error!(%err, "failed to serialize response");
                Bytes::new()
            }
        };

        let http_response = http::Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, APPLICATION_JSON_UTF_8_HEADER_VALUE.clone())
            .body(Body::from(serialized.clone()))
            .unwrap();

        if let Some(callback) = &self.result_callback_fn {
            callback(&params, &response, &serialized);
        }

        http_response
    }
}

impl<S> tower::Service<http::Request<Body>> for Handler<S>
where
    S: Executable,
    S::Context: Default,
{
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(request).await) })
    }
}

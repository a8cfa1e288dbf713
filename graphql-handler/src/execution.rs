//! The seam between the HTTP adapter and the external execution engine.

use crate::graphql;
use crate::graphql::Object;

/// A pre-built, executable GraphQL schema.
///
/// This is the collaborator boundary of the crate: implementors own query
/// parsing, validation, and execution. The handler never inspects the
/// schema; it only forwards [`ExecutionParams`] and serializes whatever
/// comes back.
pub trait Executable: Send + Sync + 'static {
    /// Request-scoped value made available to field resolution.
    type Context: Send + Sync + 'static;

    /// Run one operation to completion.
    ///
    /// The call is synchronous from the handler's perspective; any internal
    /// concurrency is the engine's business. Query-level failures (syntax
    /// errors, validation errors, resolver failures) are reported through
    /// [`graphql::Response::errors`], never as a transport error.
    fn execute(&self, params: &ExecutionParams<Self::Context>) -> graphql::Response;
}

/// Everything the engine needs to run one operation. Built fresh per
/// request and dropped as soon as the response has been written.
#[derive(Debug)]
pub struct ExecutionParams<C> {
    /// The operation source text.
    pub query: String,
    /// Which operation to run when the document contains several.
    pub operation_name: Option<String>,
    /// JSON values for the variables referenced by the operation.
    pub variables: Object,
    /// Optional per-request seed value for field resolution.
    pub root_object: Option<Object>,
    /// Caller-supplied request context.
    pub context: C,
}

/// Invoke the engine and, when a formatter is configured, rewrite each
/// reported error one-to-one, preserving order and count.
pub(crate) fn execute<S: Executable>(
    schema: &S,
    params: &ExecutionParams<S::Context>,
    format_error: Option<&(dyn Fn(graphql::Error) -> graphql::Error + Send + Sync)>,
) -> graphql::Response {
    let mut response = schema.execute(params);
    if let Some(format_error) = format_error {
        if !response.errors.is_empty() {
            response.errors = std::mem::take(&mut response.errors)
                .into_iter()
                .map(format_error)
                .collect();
        }
    }
    response
}

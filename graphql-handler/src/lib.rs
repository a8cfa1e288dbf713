//! Serves a pre-built GraphQL schema over HTTP.
//!
//! This crate is an adapter: it turns incoming HTTP requests into GraphQL
//! execution parameters, hands them to an execution engine supplied through
//! the [`Executable`] trait, and writes the result back out as JSON. It does
//! not parse, validate, or execute queries itself.
//!
//! Requests are accepted as GET query strings or as POST bodies encoded as
//! JSON, raw GraphQL (`application/graphql`), URL-encoded forms, or
//! multipart forms with file uploads. Browser navigations can be answered
//! with an interactive query console instead of JSON.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use graphql_handler::graphql;
//! use graphql_handler::Executable;
//! use graphql_handler::ExecutionParams;
//! use graphql_handler::Handler;
//!
//! struct StarWarsSchema;
//!
//! impl Executable for StarWarsSchema {
//!     type Context = ();
//!
//!     fn execute(&self, params: &ExecutionParams<()>) -> graphql::Response {
//!         // delegate to your engine of choice here
//!         graphql::Response::builder().build()
//!     }
//! }
//!
//! let handler = Handler::builder()
//!     .schema(Arc::new(StarWarsSchema))
//!     .title("Star Wars API")
//!     .pretty(false)
//!     .build();
//! // `handler` is a `tower::Service` and can be mounted on any hyper or
//! // axum server, e.g. `axum::Router::new().route_service("/graphql", handler)`.
//! ```

#![warn(unreachable_pub)]

mod body;
mod console;
mod execution;
pub mod graphql;
mod handler;

pub use axum::body::Body;
pub use execution::Executable;
pub use execution::ExecutionParams;
pub use handler::FormatErrorFn;
pub use handler::Handler;
pub use handler::PreResponseFn;
pub use handler::ResultCallbackFn;
pub use handler::RootObjectFn;

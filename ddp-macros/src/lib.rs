//! Procedural macros for DDP method and publication registration.
//!
//! This crate provides attribute macros that reduce boilerplate when
//! registering typed methods and publications with `ddp_server`. The macros
//! handle EJSON (de)serialization and error mapping automatically, leaving
//! the function body to work with plain Rust types.
//!
//! # Available Macros
//!
//! ## `#[method]`: DDP Method
//!
//! Transforms a typed async function into a factory returning
//! `Arc<dyn ddp_server::MethodHandler>`:
//!
//! ```ignore
//! use serde::Deserialize;
//! use ddp_core::Result;
//!
//! #[derive(Deserialize)]
//! struct AddParams { a: i32, b: i32 }
//!
//! #[ddp_macros::method]
//! async fn add(params: AddParams, _user: Option<String>) -> Result<i32> {
//!     Ok(params.a + params.b)
//! }
//! ```
//!
//! ## `#[publication]`: DDP Publication
//!
//! Transforms a typed async function into a factory returning
//! `Arc<dyn ddp_server::PublicationHandler>`:
//!
//! ```ignore
//! use ddp_core::Result;
//! use ddp_server::Query;
//!
//! #[ddp_macros::publication]
//! async fn tasks(_params: (), _user: Option<String>) -> Result<Vec<(String, Query)>> {
//!     Ok(vec![("tasks".to_string(), Query::all())])
//! }
//! ```
//!
//! # Why Macros?
//!
//! Without them, registering a method means writing the `method_fn`/
//! `publication_fn` closure by hand: deserializing `Option<Value>` into a
//! typed params struct, mapping the serde error into `ddp_core::Error`, and
//! (for methods) serializing the result back. The macros generate exactly
//! that wrapping so application code can write plain typed functions.

mod method;
mod publication;

use proc_macro::TokenStream;

/// Attribute macro for defining a DDP method handler.
///
/// See the crate-level docs for an example. The attributed function must
/// take a typed params argument (or none, defaulting to `()`) and an
/// `Option<String>` acting-user argument, and return a `Result<T>` where `T:
/// serde::Serialize`.
#[proc_macro_attribute]
pub fn method(_attr: TokenStream, item: TokenStream) -> TokenStream {
    method::method_impl(item)
}

/// Attribute macro for defining a DDP publication handler.
///
/// See the crate-level docs for an example. The attributed function must
/// take a typed params argument (or none, defaulting to `()`) and an
/// `Option<String>` acting-user argument, and return a
/// `Result<Vec<(String, ddp_server::Query)>>`.
#[proc_macro_attribute]
pub fn publication(_attr: TokenStream, item: TokenStream) -> TokenStream {
    publication::publication_impl(item)
}

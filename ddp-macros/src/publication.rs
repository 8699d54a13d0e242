//! `#[publication]` procedural macro implementation.
//!
//! Transforms a typed async function into a factory returning
//! `Arc<dyn ddp_server::PublicationHandler>`. Mirrors [`crate::method`]'s
//! shape, minus the result-serialization step: a publication's expansion is
//! already the `Vec<(String, Query)>` `ddp_server::publication_fn` expects,
//! not an EJSON value.
//!
//! Input:
//! ```ignore
//! #[publication]
//! async fn tasks(params: TasksParams, user: Option<String>) -> Result<Vec<(String, Query)>> {
//!     Ok(vec![("tasks".to_string(), Query::all())])
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, ReturnType};

pub fn publication_impl(input: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(input as ItemFn);

    let fn_name = &input_fn.sig.ident;
    let fn_vis = &input_fn.vis;
    let fn_block = &input_fn.block;
    let fn_attrs = &input_fn.attrs;

    let param_type = match input_fn.sig.inputs.first() {
        Some(FnArg::Typed(pat_type)) => {
            let ty = &pat_type.ty;
            quote! { #ty }
        }
        _ => quote! { () },
    };

    let return_type = match &input_fn.sig.output {
        ReturnType::Type(_, ty) => quote! { #ty },
        ReturnType::Default => quote! { ddp_core::Result<Vec<(String, ddp_server::Query)>> },
    };

    let expanded = quote! {
        #(#fn_attrs)*
        #fn_vis fn #fn_name() -> std::sync::Arc<dyn ddp_server::PublicationHandler> {
            async fn inner_handler(
                params: #param_type,
                acting_user: Option<String>,
            ) -> #return_type {
                #fn_block
            }

            ddp_server::publication_fn(move |raw_params, acting_user| async move {
                let params: #param_type = match raw_params {
                    Some(v) => serde_json::from_value(v)
                        .map_err(|e| ddp_core::Error::Codec(e.to_string()))?,
                    None => serde_json::from_value(serde_json::Value::Null)
                        .map_err(|e| ddp_core::Error::Codec(e.to_string()))?,
                };
                inner_handler(params, acting_user).await
            })
        }
    };

    TokenStream::from(expanded)
}

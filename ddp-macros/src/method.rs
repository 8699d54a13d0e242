//! `#[method]` procedural macro implementation.
//!
//! Transforms a typed async function into a factory returning
//! `Arc<dyn ddp_server::MethodHandler>`, the same way the params are
//! deserialized from EJSON and the result serialized back by
//! `ddp_server::method_fn`. The macro just removes the boilerplate of
//! writing that closure by hand.
//!
//! Input:
//! ```ignore
//! #[method]
//! async fn add(params: AddParams, _user: Option<String>) -> Result<i32> {
//!     Ok(params.a + params.b)
//! }
//! ```
//!
//! Generated output (approximately):
//! ```ignore
//! fn add() -> std::sync::Arc<dyn ddp_server::MethodHandler> {
//!     async fn inner_handler(params: AddParams, _user: Option<String>) -> Result<i32> {
//!         Ok(params.a + params.b)
//!     }
//!     ddp_server::method_fn(|raw_params, acting_user, _id_gen, _origin| async move {
//!         let params: AddParams = match raw_params {
//!             Some(v) => serde_json::from_value(v)
//!                 .map_err(|e| ddp_core::Error::Codec(e.to_string()))?,
//!             None => serde_json::from_value(serde_json::Value::Null)
//!                 .map_err(|e| ddp_core::Error::Codec(e.to_string()))?,
//!         };
//!         let result = inner_handler(params, acting_user).await?;
//!         serde_json::to_value(result).map_err(|e| ddp_core::Error::Codec(e.to_string()))
//!     })
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, ReturnType};

pub fn method_impl(input: TokenStream) -> TokenStream {
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
        ReturnType::Default => quote! { () },
    };

    let expanded = quote! {
        #(#fn_attrs)*
        #fn_vis fn #fn_name() -> std::sync::Arc<dyn ddp_server::MethodHandler> {
            async fn inner_handler(
                params: #param_type,
                acting_user: Option<String>,
            ) -> #return_type {
                #fn_block
            }

            ddp_server::method_fn(move |raw_params, acting_user, _id_gen, _origin| async move {
                let params: #param_type = match raw_params {
                    Some(v) => serde_json::from_value(v)
                        .map_err(|e| ddp_core::Error::Codec(e.to_string()))?,
                    None => serde_json::from_value(serde_json::Value::Null)
                        .map_err(|e| ddp_core::Error::Codec(e.to_string()))?,
                };
                let result = inner_handler(params, acting_user).await?;
                serde_json::to_value(result).map_err(|e| ddp_core::Error::Codec(e.to_string()))
            })
        }
    };

    TokenStream::from(expanded)
}

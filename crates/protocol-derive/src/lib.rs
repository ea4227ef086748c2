//! Derive macro for tidewire-protocol
//!
//! Implements `WireMessage` for a serde type, taking the type code from a
//! `#[type_code = N]` attribute and the diagnostic name from the type name.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Expr, Lit, Meta};

/// Derives the `WireMessage` trait
///
/// # Attributes
///
/// - `#[type_code = N]`: Required. The wire type code (`u16`). Codes at or
///   above `0xFF00` are reserved for system messages.
///
/// # Example
///
/// ```ignore
/// use serde::{Serialize, Deserialize};
/// use tidewire_protocol_derive::WireMessage;
///
/// #[derive(Debug, Serialize, Deserialize, WireMessage)]
/// #[type_code = 1]
/// struct Greeting {
///     text: String,
/// }
/// ```
#[proc_macro_derive(WireMessage, attributes(type_code))]
pub fn derive_wire_message(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let type_code = match extract_type_code(&input) {
        Ok(code) => code,
        Err(err) => return err.to_compile_error().into(),
    };

    let name = &input.ident;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::tidewire_protocol::WireMessage for #name #ty_generics #where_clause {
            const TYPE_CODE: u16 = #type_code;
            const NAME: &'static str = #name_str;
        }
    };

    TokenStream::from(expanded)
}

/// Extracts the `type_code` attribute value
fn extract_type_code(input: &DeriveInput) -> syn::Result<u16> {
    for attr in &input.attrs {
        if !attr.path().is_ident("type_code") {
            continue;
        }
        if let Meta::NameValue(meta) = &attr.meta {
            if let Expr::Lit(expr_lit) = &meta.value {
                if let Lit::Int(lit) = &expr_lit.lit {
                    return lit.base10_parse::<u16>();
                }
            }
        }
        return Err(syn::Error::new_spanned(
            attr,
            "expected `#[type_code = N]` with an integer literal",
        ));
    }
    Err(syn::Error::new_spanned(
        &input.ident,
        "WireMessage requires a #[type_code = N] attribute",
    ))
}

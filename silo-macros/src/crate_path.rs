//! Crate path resolution for generated code.
//!
//! Generated `impl` blocks need to name `silo_data`/`silo_core` types, but a
//! downstream crate might depend on them directly or only transitively
//! through the `silo` facade crate. `proc-macro-crate` tells us which one is
//! actually in the dependency graph so the generated code references a path
//! that is guaranteed to resolve.

use proc_macro2::TokenStream;
use proc_macro_crate::{crate_name, FoundCrate};
use quote::quote;

fn resolve(direct: &str, facade_member: Option<&str>) -> TokenStream {
    if let Ok(found) = crate_name(direct) {
        return match found {
            FoundCrate::Itself => quote!(crate),
            FoundCrate::Name(name) => {
                let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
                quote!(::#ident)
            }
        };
    }
    if let Ok(found) = crate_name("silo") {
        let member = facade_member.map(|m| syn::Ident::new(m, proc_macro2::Span::call_site()));
        return match (found, member) {
            (FoundCrate::Itself, Some(m)) => quote!(crate::#m),
            (FoundCrate::Itself, None) => quote!(crate),
            (FoundCrate::Name(name), Some(m)) => {
                let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
                quote!(::#ident::#m)
            }
            (FoundCrate::Name(name), None) => {
                let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
                quote!(::#ident)
            }
        };
    }
    let fallback = syn::Ident::new(&direct.replace('-', "_"), proc_macro2::Span::call_site());
    quote!(::#fallback)
}

/// Returns the token stream for accessing `silo_core` types: `::silo_core`
/// when depended on directly, `::silo::silo_core` through the facade.
pub fn silo_core_path() -> TokenStream {
    resolve("silo-core", Some("silo_core"))
}

/// Returns the token stream for accessing `silo_data` types.
pub fn silo_data_path() -> TokenStream {
    resolve("silo-data", Some("silo_data"))
}

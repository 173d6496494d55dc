use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use sheetdb::migration::MigrationSnapshot;

use crate::type_utils::struct_name;

/// Generate `register`, which adds every scaffolded type to a context
/// builder in table order.
pub fn generate_register(snapshot: &MigrationSnapshot) -> TokenStream {
    let types = snapshot
        .entities
        .values()
        .map(|e| format_ident!("{}", struct_name(&e.class_name)));

    quote! {
        /// Register every scaffolded entity type with a context builder.
        pub fn register(builder: sheetdb::SheetContextBuilder) -> sheetdb::SheetContextBuilder {
            builder #(.register::<#types>())*
        }
    }
}

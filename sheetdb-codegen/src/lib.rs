//! SheetDB code generation - scaffolds typed entities from a migration snapshot.
//!
//! The main entry point is [`generate_from_snapshot`], which reads a snapshot
//! JSON file and writes a Rust source file with one struct per table, its
//! `Entity` and `Navigate` impls, and a `register` function for the context
//! builder.

mod context_gen;
mod struct_gen;
pub mod type_utils;

use proc_macro2::TokenStream;
use sheetdb::migration::MigrationSnapshot;
use std::path::Path;

pub use struct_gen::{navigations, Navigation};

/// Generate entity source from a snapshot file.
///
/// # Example
///
/// ```no_run
/// // In build.rs:
/// sheetdb_codegen::generate_from_snapshot("Migrations/sheetdb_snapshot.json", "src/entities.rs").unwrap();
/// ```
pub fn generate_from_snapshot(
    snapshot_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(snapshot_path)?;
    let snapshot = MigrationSnapshot::from_json(&json)?;
    std::fs::write(output_path, generate_entities(&snapshot))?;
    Ok(())
}

/// Generate formatted entity source for every table of a snapshot.
pub fn generate_entities(snapshot: &MigrationSnapshot) -> String {
    let mut tokens = TokenStream::new();
    for schema in snapshot.entities.values() {
        tokens.extend(struct_gen::generate_entity(snapshot, schema));
    }
    tokens.extend(context_gen::generate_register(snapshot));

    let header = match snapshot.migration_id() {
        Some(id) => format!("// Generated by sheetdb-codegen from migration {id}. Do not edit.\n\n"),
        None => "// Generated by sheetdb-codegen. Do not edit.\n\n".to_string(),
    };
    format!("{header}{}", format_token_stream(&tokens))
}

fn format_token_stream(tokens: &TokenStream) -> String {
    match syn::parse2::<syn::File>(tokens.clone()) {
        Ok(file) => prettyplease::unparse(&file),
        Err(_) => tokens.to_string(),
    }
}

use heck::{ToPascalCase, ToSnakeCase};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use sheetdb::schema::{ColumnSchema, DataType};

/// Struct name for an entity class. e.g. "order_line" -> "OrderLine"
pub fn struct_name(class_name: &str) -> String {
    class_name.to_pascal_case()
}

/// Rust type of a column, wrapped in `Option` when the column is nullable.
pub fn column_rust_type(column: &ColumnSchema) -> TokenStream {
    let base = base_type(column.data_type);
    if column.is_nullable {
        quote! { Option<#base> }
    } else {
        base
    }
}

/// Rust type for a data type, without nullability.
pub fn base_type(data_type: DataType) -> TokenStream {
    match data_type {
        DataType::String | DataType::Enum => quote! { String },
        DataType::Int32 => quote! { i32 },
        DataType::Int64 => quote! { i64 },
        DataType::Decimal => quote! { rust_decimal::Decimal },
        DataType::Double => quote! { f64 },
        DataType::Boolean => quote! { bool },
        DataType::DateTime => quote! { chrono::DateTime<chrono::Utc> },
        DataType::Date => quote! { chrono::NaiveDate },
    }
}

/// `sheetdb::DataType::<Variant>` for a data type.
pub fn data_type_path(data_type: DataType) -> TokenStream {
    let variant = format_ident!("{}", format!("{data_type:?}"));
    quote! { sheetdb::DataType::#variant }
}

/// Expression reading a `Value` named `value` into the column's field type.
pub fn value_reader(column: &ColumnSchema) -> TokenStream {
    let read = match column.data_type {
        DataType::String | DataType::Enum => quote! { value.into_text() },
        DataType::Int32 => quote! { value.as_i32() },
        DataType::Int64 => quote! { value.as_i64() },
        DataType::Decimal => quote! { value.as_decimal() },
        DataType::Double => quote! { value.as_f64() },
        DataType::Boolean => quote! { value.as_bool() },
        DataType::DateTime => quote! { value.as_timestamp() },
        DataType::Date => quote! { value.as_date() },
    };
    if column.is_nullable {
        read
    } else {
        quote! { #read.unwrap_or_default() }
    }
}

/// Whether reading the field into a `Value` needs a clone.
pub fn needs_clone(data_type: DataType) -> bool {
    matches!(data_type, DataType::String | DataType::Enum)
}

/// Field identifier for a property name, escaping Rust keywords.
pub fn safe_field_ident(name: &str) -> proc_macro2::Ident {
    let snake = name.to_snake_case();
    match snake.as_str() {
        "type" | "struct" | "enum" | "fn" | "let" | "mut" | "ref" | "mod" | "use" | "pub"
        | "impl" | "trait" | "for" | "loop" | "while" | "if" | "else" | "match" | "return"
        | "break" | "continue" | "as" | "in" | "where" | "async" | "await" | "dyn" | "move"
        | "static" | "const" | "unsafe" | "extern" | "true" | "false" | "abstract" | "become"
        | "box" | "do" | "final" | "macro" | "override" | "priv" | "typeof" | "unsized"
        | "virtual" | "yield" | "try" => format_ident!("r#{}", snake),
        // Not valid even as raw identifiers.
        "self" | "super" | "crate" => format_ident!("{}_", snake),
        _ => format_ident!("{}", snake),
    }
}

/// Naive English pluralization for collection navigation names.
pub fn pluralize(word: &str) -> String {
    if word.ends_with('y') && !word.ends_with("ey") && !word.ends_with("ay") {
        format!("{}ies", &word[..word.len() - 1])
    } else if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

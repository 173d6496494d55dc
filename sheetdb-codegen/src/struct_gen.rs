use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use sheetdb::migration::MigrationSnapshot;
use sheetdb::schema::{ColumnSchema, EntitySchema, RelationshipKind};
use std::collections::BTreeMap;

use crate::type_utils::{
    column_rust_type, data_type_path, needs_clone, pluralize, safe_field_ident, struct_name,
    value_reader,
};

/// A navigation field recovered from the snapshot's relationships.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub name: String,
    pub target_class: String,
    pub collection: bool,
}

/// Navigations of one entity.
///
/// A foreign key `<X>Id` yields a reference navigation `<X>`. A many-to-one
/// relationship pointing at this table yields a collection named after the
/// plural of the referring class.
pub fn navigations(snapshot: &MigrationSnapshot, schema: &EntitySchema) -> Vec<Navigation> {
    let class_of = |table: &str| {
        snapshot
            .entities
            .get(table)
            .map(|e| e.class_name.clone())
    };
    let taken = |name: &str, found: &[Navigation]| {
        schema.column_for_property(name).is_some() || found.iter().any(|n| n.name == name)
    };

    let mut found: Vec<Navigation> = Vec::new();
    for rel in &schema.relationships {
        let Some(name) = rel.from_field.strip_suffix("Id") else {
            continue;
        };
        let Some(target_class) = class_of(&rel.to_table) else {
            continue;
        };
        if name.is_empty() || taken(name, &found) {
            continue;
        }
        found.push(Navigation {
            name: name.to_string(),
            target_class,
            collection: false,
        });
    }

    for other in snapshot.entities.values() {
        let refers_here = other
            .relationships
            .iter()
            .any(|r| r.to_table == schema.table_name && r.kind == RelationshipKind::ManyToOne);
        if !refers_here {
            continue;
        }
        let name = pluralize(&other.class_name);
        if taken(&name, &found) {
            continue;
        }
        found.push(Navigation {
            name,
            target_class: other.class_name.clone(),
            collection: true,
        });
    }

    found
}

/// Generate the struct, its `Entity` impl and its `Navigate` impls.
pub fn generate_entity(snapshot: &MigrationSnapshot, schema: &EntitySchema) -> TokenStream {
    let ident = format_ident!("{}", struct_name(&schema.class_name));
    let navigations = navigations(snapshot, schema);

    let doc = format!(" A row of the `{}` sheet.", schema.table_name);
    let column_fields = schema.columns.iter().map(|c| {
        let field = safe_field_ident(&c.property_name);
        let ty = column_rust_type(c);
        quote! { pub #field: #ty, }
    });
    let navigation_fields = navigations.iter().map(|n| {
        let field = safe_field_ident(&n.name);
        let target = format_ident!("{}", struct_name(&n.target_class));
        if n.collection {
            quote! { pub #field: Vec<#target>, }
        } else {
            quote! { pub #field: Option<Box<#target>>, }
        }
    });

    let model = generate_model(schema, &navigations);
    let accessors = generate_accessors(schema);
    let navigate = generate_navigate_impls(&ident, &navigations);

    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct #ident {
            #(#column_fields)*
            #(#navigation_fields)*
        }

        impl sheetdb::Entity for #ident {
            #model
            #accessors
        }

        #navigate
    }
}

fn generate_model(schema: &EntitySchema, navigations: &[Navigation]) -> TokenStream {
    let class_name = &schema.class_name;
    let table = &schema.table_name;

    let namespace = (!schema.namespace.is_empty()).then(|| {
        let ns = &schema.namespace;
        quote! { .namespace(#ns) }
    });
    let keyless = schema.primary_key().is_none().then(|| quote! { .keyless() });

    let columns = schema.columns.iter().map(column_model);
    let navs = navigations.iter().map(|n| {
        let name = &n.name;
        let target = &n.target_class;
        if n.collection {
            quote! { .field(sheetdb::FieldModel::collection(#name, #target)) }
        } else {
            quote! { .field(sheetdb::FieldModel::reference(#name, #target)) }
        }
    });

    quote! {
        fn model() -> sheetdb::EntityModel {
            sheetdb::EntityModel::new(#class_name)
                #namespace
                .table(#table)
                #keyless
                #(#columns)*
                #(#navs)*
        }
    }
}

fn column_model(column: &ColumnSchema) -> TokenStream {
    let property = &column.property_name;
    let data_type = data_type_path(column.data_type);
    let constructor = if column.is_nullable {
        quote! { sheetdb::FieldModel::nullable(#property, #data_type) }
    } else {
        quote! { sheetdb::FieldModel::scalar(#property, #data_type) }
    };

    let rename = (column.name != column.property_name).then(|| {
        let name = &column.name;
        quote! { .column(#name) }
    });
    let key = column.is_primary_key.then(|| quote! { .key() });
    let max_length = column.max_length.map(|n| quote! { .max_length(#n) });
    let default = column.default_value.as_ref().map(|v| quote! { .default_value(#v) });

    quote! {
        .field(#constructor #rename #key #max_length #default)
    }
}

fn generate_accessors(schema: &EntitySchema) -> TokenStream {
    if schema.columns.is_empty() {
        return quote! {
            fn get(&self, _field: &str) -> sheetdb::Value {
                sheetdb::Value::Null
            }

            fn set(&mut self, _field: &str, _value: sheetdb::Value) {}
        };
    }

    let get_arms = schema.columns.iter().map(|c| {
        let property = &c.property_name;
        let field = safe_field_ident(property);
        if needs_clone(c.data_type) {
            quote! { #property => self.#field.clone().into(), }
        } else {
            quote! { #property => self.#field.into(), }
        }
    });
    let set_arms = schema.columns.iter().map(|c| {
        let property = &c.property_name;
        let field = safe_field_ident(property);
        let read = value_reader(c);
        quote! { #property => self.#field = #read, }
    });

    quote! {
        fn get(&self, field: &str) -> sheetdb::Value {
            match field {
                #(#get_arms)*
                _ => sheetdb::Value::Null,
            }
        }

        fn set(&mut self, field: &str, value: sheetdb::Value) {
            match field {
                #(#set_arms)*
                _ => {}
            }
        }
    }
}

fn generate_navigate_impls(ident: &proc_macro2::Ident, navigations: &[Navigation]) -> TokenStream {
    let mut by_target: BTreeMap<&str, Vec<&Navigation>> = BTreeMap::new();
    for n in navigations {
        by_target.entry(n.target_class.as_str()).or_default().push(n);
    }

    let impls = by_target.into_iter().map(|(target_class, navs)| {
        let target = format_ident!("{}", struct_name(target_class));
        let arms = navs.iter().map(|n| {
            let name = &n.name;
            let field = safe_field_ident(name);
            if n.collection {
                quote! { #name => self.#field = related, }
            } else {
                quote! { #name => self.#field = related.into_iter().next().map(Box::new), }
            }
        });
        quote! {
            impl sheetdb::Navigate<#target> for #ident {
                fn attach(&mut self, navigation: &str, related: Vec<#target>) {
                    match navigation {
                        #(#arms)*
                        _ => {}
                    }
                }
            }
        }
    });

    quote! { #(#impls)* }
}

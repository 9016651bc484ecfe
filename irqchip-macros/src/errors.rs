// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, Parser};
use syn::{
    Attribute, DeriveInput, Field, Fields, FieldsNamed, GenericArgument, Ident, PathArguments,
    Type, Variant, parse_macro_input, parse_quote,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    None,
    Source,
    Error,
}

fn field_name(field: &Field) -> Option<&Ident> {
    field.ident.as_ref()
}

fn cause_of(fields: &FieldsNamed) -> Cause {
    let mut cause = Cause::None;
    for name in fields.named.iter().filter_map(field_name) {
        if name == "source" {
            return Cause::Source;
        }
        if name == "error" {
            cause = Cause::Error;
        }
    }
    cause
}

/// Returns `T` for a `Box<T>` where `T` is not a trait object.
fn boxed_concrete(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.first()?;
    if segment.ident != "Box" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(Type::TraitObject(_)) => None,
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

fn add_location(variant: &mut Variant) {
    if matches!(variant.fields, Fields::Unit) {
        variant.fields = Fields::Named(parse_quote!({}));
    }
    let Fields::Named(fields) = &mut variant.fields else {
        panic!("trace_error: variant {} must use named fields", variant.ident)
    };
    let location = Field::parse_named
        .parse2(quote! {#[snafu(implicit)] _location: ::snafu::Location})
        .expect("location field");
    fields.named.push(location);

    let cause = fields.named.iter_mut().find(|f| {
        field_name(f).is_some_and(|name| name == "source" || name == "error")
    });
    if let Some(cause) = cause {
        let attr: Attribute = match boxed_concrete(&cause.ty) {
            Some(inner) => parse_quote! {#[snafu(source(from(#inner, Box::new)))]},
            None => parse_quote! {#[snafu(source)]},
        };
        cause.attrs.push(attr);
    }
}

pub fn trace_error(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(item as DeriveInput);
    let syn::Data::Enum(data) = &mut input.data else {
        panic!("trace_error only applies to enums")
    };
    data.variants.iter_mut().for_each(add_location);
    quote! { #input }.into()
}

fn trace_arm(name: &Ident, variant: &Variant) -> TokenStream2 {
    let Fields::Named(fields) = &variant.fields else {
        panic!("DebugTrace: variant {} must use named fields", variant.ident)
    };
    let cfgs = variant.attrs.iter().filter(|a| a.path().is_ident("cfg"));
    let ident = &variant.ident;
    match cause_of(fields) {
        Cause::Source => quote! {
            #(#cfgs)*
            #name::#ident { _location, source, .. } => {
                let depth = source.debug_trace(f)?;
                writeln!(f, "{depth}: {self}, at {_location}")?;
                Ok(depth + 1)
            }
        },
        Cause::Error => quote! {
            #(#cfgs)*
            #name::#ident { _location, error, .. } => {
                writeln!(f, "0: {error}")?;
                writeln!(f, "1: {self}, at {_location}")?;
                Ok(2)
            }
        },
        Cause::None => quote! {
            #(#cfgs)*
            #name::#ident { _location, .. } => {
                writeln!(f, "0: {self}, at {_location}")?;
                Ok(1)
            }
        },
    }
}

pub fn derive_debug_trace(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let syn::Data::Enum(data) = &input.data else {
        panic!("DebugTrace only applies to enums")
    };
    let arms = data.variants.iter().map(|v| trace_arm(name, v));

    quote! {
        impl DebugTrace for #name {
            #[inline(never)]
            fn debug_trace(
                &self,
                f: &mut ::std::fmt::Formatter<'_>,
            ) -> ::std::result::Result<u32, ::std::fmt::Error> {
                match self {
                    #(#arms)*
                }
            }
        }

        impl ::std::fmt::Debug for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                writeln!(f, "{self}")?;
                DebugTrace::debug_trace(self, f)?;
                Ok(())
            }
        }
    }
    .into()
}

//! Derive macro for the `Upcast` trait.

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, punctuated::Punctuated, spanned::Spanned, Attribute, Data,
    DeriveInput, Index, Member, Meta, Path, Type, WhereClause,
};

/// Derive `Upcast` implementations.
///
/// - `#[upcast]` on a field generates `Upcast<FieldType>`, projecting to that
///   field. Use it for an embedded base value.
/// - `#[upcast(dyn Trait, ...)]` on the type generates `Upcast<dyn Trait>` for
///   each listed trait object, using an unsizing coercion.
/// - `#[shared_ptr(crate = path)]` overrides the path of the `shared_ptr`
///   crate.
#[proc_macro_derive(Upcast, attributes(upcast, shared_ptr))]
pub fn derive_upcast(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(generated) => generated.into(),
        Err(err) => err.into_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let krate = crate_path(&input.attrs)?;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut impls = Vec::new();

    for target in trait_object_targets(&input.attrs)? {
        let mut where_clause = where_clause.cloned().unwrap_or_else(|| WhereClause {
            where_token: syn::Token![where](target.span()),
            predicates: Punctuated::new(),
        });
        where_clause.predicates.push(parse_quote!(Self: 'static));
        impls.push(quote_spanned! {target.span() =>
            unsafe impl #impl_generics #krate::Upcast<#target> for #name #ty_generics #where_clause {
                #[inline]
                fn upcast_ptr(ptr: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<#target> {
                    ptr
                }
            }
        });
    }

    for (member, ty) in base_fields(name, &input.data)? {
        impls.push(quote! {
            unsafe impl #impl_generics #krate::Upcast<#ty> for #name #ty_generics #where_clause {
                #[inline]
                fn upcast_ptr(ptr: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<#ty> {
                    // SAFETY: a field of a non-null, valid pointer is non-null
                    // and lives exactly as long as its parent.
                    unsafe {
                        ::core::ptr::NonNull::new_unchecked(
                            ::core::ptr::addr_of_mut!((*ptr.as_ptr()).#member),
                        )
                    }
                }
            }
        });
    }

    if impls.is_empty() {
        return Err(syn::Error::new_spanned(
            name,
            "`Upcast` needs an `#[upcast]` field or an `#[upcast(dyn Trait)]` attribute",
        ));
    }

    Ok(quote! { #(#impls)* })
}

fn crate_path(attrs: &[Attribute]) -> Result<Path, syn::Error> {
    let mut krate: Path = parse_quote!(::shared_ptr);

    for attr in attrs {
        if !attr.path().is_ident("shared_ptr") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                krate = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        })?;
    }

    Ok(krate)
}

/// Trait objects listed in type-level `#[upcast(...)]` attributes.
fn trait_object_targets(attrs: &[Attribute]) -> Result<Vec<Type>, syn::Error> {
    let mut targets = Vec::new();

    for attr in attrs {
        if !attr.path().is_ident("upcast") {
            continue;
        }
        let Meta::List(_) = attr.meta else {
            return Err(syn::Error::new_spanned(
                attr,
                "expected `#[upcast(dyn Trait, ...)]` on the type",
            ));
        };

        let listed = attr.parse_args_with(Punctuated::<Type, syn::Token![,]>::parse_terminated)?;
        for ty in listed {
            if !matches!(ty, Type::TraitObject(_)) {
                return Err(syn::Error::new_spanned(
                    ty,
                    "only trait objects can be listed, e.g. `dyn Trait`",
                ));
            }
            targets.push(ty);
        }
    }

    Ok(targets)
}

/// Fields marked `#[upcast]`, with the member used to project to them.
fn base_fields<'a>(
    name: &syn::Ident,
    data: &'a Data,
) -> Result<Vec<(Member, &'a Type)>, syn::Error> {
    match data {
        Data::Struct(data) => {
            let mut bases = Vec::new();
            for (i, field) in data.fields.iter().enumerate() {
                if !has_field_marker(&field.attrs)? {
                    continue;
                }
                let member = field.ident.clone().map_or_else(
                    || Member::Unnamed(Index::from(i)),
                    Member::Named,
                );
                bases.push((member, &field.ty));
            }
            Ok(bases)
        }
        Data::Enum(data) => {
            for variant in &data.variants {
                for field in &variant.fields {
                    if has_field_marker(&field.attrs)? {
                        return Err(syn::Error::new_spanned(
                            field,
                            format!("`#[upcast]` fields are not supported on enum `{name}`"),
                        ));
                    }
                }
            }
            Ok(Vec::new())
        }
        Data::Union(u) => Err(syn::Error::new(
            u.union_token.span,
            "`Upcast` must be manually implemented for unions",
        )),
    }
}

fn has_field_marker(attrs: &[Attribute]) -> Result<bool, syn::Error> {
    for attr in attrs {
        if !attr.path().is_ident("upcast") {
            continue;
        }
        return match attr.meta {
            Meta::Path(_) => Ok(true),
            _ => Err(syn::Error::new_spanned(
                attr,
                "expected a bare `#[upcast]` on a field",
            )),
        };
    }
    Ok(false)
}

//! Derive macros for `varpack::Pack` and `varpack::Unpack`.
//!
//! Structs encode their fields back to back in declaration order. Enums
//! encode the variant index as a uvarint, then that variant's fields. Every
//! field decode is wrapped with the field name and its declared type so a
//! failure deep inside a record says exactly where it happened.

use proc_macro::TokenStream;
use proc_macro2::Span;
use proc_macro2::TokenStream as TokenStream2;
use quote::format_ident;
use quote::quote;
use syn::Data;
use syn::DeriveInput;
use syn::Fields;
use syn::GenericParam;
use syn::Generics;
use syn::Type;
use syn::parse_macro_input;
use syn::parse_quote;

#[proc_macro_derive(Pack)]
pub fn derive_pack(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_pack(input).unwrap_or_else(|e| e.to_compile_error()).into()
}

#[proc_macro_derive(Unpack)]
pub fn derive_unpack(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_unpack(input).unwrap_or_else(|e| e.to_compile_error()).into()
}

fn add_bound(mut generics: Generics, bound: syn::TypeParamBound) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ty) = param {
            ty.bounds.push(bound.clone());
        }
    }
    generics
}

/// Renders a type the way a person would write it (`Vec<u8>`, not `Vec < u8 >`).
fn type_name(ty: &Type) -> String {
    quote!(#ty)
        .to_string()
        .replace(" < ", "<")
        .replace("< ", "<")
        .replace(" >", ">")
        .replace(" ,", ",")
        .replace(" :: ", "::")
        .replace(":: ", "::")
        .replace("& ", "&")
}

/// Field accessors for `Pack` on a struct.
fn pack_struct_fields(fields: &Fields) -> TokenStream2 {
    let packs = fields.iter().enumerate().map(|(i, field)| {
        let access = match &field.ident {
            Some(ident) => quote!(self.#ident),
            None => {
                let index = syn::Index::from(i);
                quote!(self.#index)
            }
        };
        quote! { ::varpack::Pack::pack(&#access, enc)?; }
    });
    quote! { #(#packs)* }
}

/// Local bindings for each field, in order, plus the constructor that uses them.
fn unpack_fields(fields: &Fields, ctor: TokenStream2) -> TokenStream2 {
    let mut lets = Vec::new();
    let mut names = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        let ty = &field.ty;
        let (binding, label) = match &field.ident {
            Some(ident) => (ident.clone(), ident.to_string()),
            None => (format_ident!("__field{}", i), i.to_string()),
        };
        let ty_label = type_name(ty);
        lets.push(quote! {
            let #binding = <#ty as ::varpack::Unpack>::unpack(dec)
                .await
                .map_err(|e| ::varpack::Error::field(#label, #ty_label, e))?;
        });
        names.push(binding);
    }

    let build = match fields {
        Fields::Named(_) => quote!(#ctor { #(#names),* }),
        Fields::Unnamed(_) => quote!(#ctor ( #(#names),* )),
        Fields::Unit => quote!(#ctor),
    };

    quote! {
        #(#lets)*
        Ok(#build)
    }
}

fn expand_pack(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let generics = add_bound(input.generics.clone(), parse_quote!(::varpack::Pack));
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let body = match &input.data {
        Data::Struct(data) => pack_struct_fields(&data.fields),
        Data::Enum(data) => {
            let arms = data.variants.iter().enumerate().map(|(index, variant)| {
                let vname = &variant.ident;
                let index = index as u64;
                match &variant.fields {
                    Fields::Unit => quote! {
                        Self::#vname => { enc.uvarint(#index)?; }
                    },
                    Fields::Unnamed(fields) => {
                        let binds: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| format_ident!("__field{}", i))
                            .collect();
                        quote! {
                            Self::#vname( #(#binds),* ) => {
                                enc.uvarint(#index)?;
                                #( ::varpack::Pack::pack(#binds, enc)?; )*
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let binds: Vec<_> = fields.named.iter().filter_map(|f| f.ident.clone()).collect();
                        quote! {
                            Self::#vname { #(#binds),* } => {
                                enc.uvarint(#index)?;
                                #( ::varpack::Pack::pack(#binds, enc)?; )*
                            }
                        }
                    }
                }
            });
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new(Span::call_site(), "Pack cannot be derived for unions"));
        }
    };

    Ok(quote! {
        impl #impl_generics ::varpack::Pack for #name #ty_generics #where_clause {
            fn pack(&self, enc: &mut ::varpack::Encoder) -> ::varpack::Result<()> {
                #body
                Ok(())
            }
        }
    })
}

fn expand_unpack(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let name_str = name.to_string();
    let generics = add_bound(input.generics.clone(), parse_quote!(::varpack::Unpack));
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let body = match &input.data {
        Data::Struct(data) => unpack_fields(&data.fields, quote!(Self)),
        Data::Enum(data) => {
            let arms = data.variants.iter().enumerate().map(|(index, variant)| {
                let vname = &variant.ident;
                let index = index as u64;
                let build = unpack_fields(&variant.fields, quote!(Self::#vname));
                quote! {
                    #index => { #build }
                }
            });
            quote! {
                let index = dec.uvarint().await?;
                match index {
                    #(#arms)*
                    other => Err(::varpack::Error::UnknownVariant { ty: #name_str, index: other }),
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new(Span::call_site(), "Unpack cannot be derived for unions"));
        }
    };

    Ok(quote! {
        #[::varpack::async_trait]
        impl #impl_generics ::varpack::Unpack for #name #ty_generics #where_clause {
            async fn unpack(dec: &mut ::varpack::Decoder) -> ::varpack::Result<Self> {
                #body
            }
        }
    })
}

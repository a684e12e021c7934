extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derives the order-preserving byte encoding used by the queue's key-value
/// backend. Struct fields append to the sink in declaration order; enums
/// lead with a variant byte.
#[proc_macro_derive(Encode)]
pub fn encode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let body = match &input.data {
        Data::Struct(data) => {
            let appends = match &data.fields {
                Fields::Named(fields) => fields
                    .named
                    .iter()
                    .map(|f| {
                        let ident = &f.ident;
                        quote! { self.#ident.encode_into(out); }
                    })
                    .collect::<Vec<_>>(),
                Fields::Unit => vec![],
                Fields::Unnamed(_) => {
                    return syn::Error::new_spanned(name, "tuple structs are not supported")
                        .to_compile_error()
                        .into();
                }
            };

            quote! { #(#appends)* }
        }
        Data::Enum(data) => {
            let arms = data.variants.iter().enumerate().map(|(index, variant)| {
                let variant_name = &variant.ident;
                let variant_index = index as u8;

                match &variant.fields {
                    Fields::Unit => quote! {
                        Self::#variant_name => out.push(#variant_index)
                    },
                    Fields::Unnamed(fields) => {
                        let bindings: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| format_ident!("f{}", i))
                            .collect();
                        quote! {
                            Self::#variant_name(#(#bindings),*) => {
                                out.push(#variant_index);
                                #(#bindings.encode_into(out);)*
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let bindings: Vec<_> = fields
                            .named
                            .iter()
                            .map(|f| f.ident.as_ref().unwrap())
                            .collect();
                        quote! {
                            Self::#variant_name { #(#bindings),* } => {
                                out.push(#variant_index);
                                #(#bindings.encode_into(out);)*
                            }
                        }
                    }
                }
            });

            quote! {
                match self {
                    #(#arms),*
                }
            }
        }
        Data::Union(_) => {
            return syn::Error::new_spanned(name, "unions are not supported")
                .to_compile_error()
                .into();
        }
    };

    let output: TokenStream2 = quote! {
        impl crate::storage::encdec::Encode for #name {
            fn encode_into(&self, out: &mut Vec<u8>) {
                #body
            }
        }
    };

    output.into()
}

#[proc_macro_derive(Decode)]
pub fn decode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let body = match &input.data {
        Data::Struct(data) => {
            let (idents, steps) = match &data.fields {
                Fields::Named(fields) => {
                    let idents: Vec<_> = fields
                        .named
                        .iter()
                        .map(|f| f.ident.clone().unwrap())
                        .collect();
                    let steps = fields
                        .named
                        .iter()
                        .map(|f| {
                            let ident = &f.ident;
                            let ty = &f.ty;
                            quote! {
                                let #ident = <#ty as crate::storage::encdec::Decode>::take(bytes)?;
                            }
                        })
                        .collect::<Vec<_>>();
                    (idents, steps)
                }
                Fields::Unit => (vec![], vec![]),
                Fields::Unnamed(_) => {
                    return syn::Error::new_spanned(name, "tuple structs are not supported")
                        .to_compile_error()
                        .into();
                }
            };

            if idents.is_empty() {
                quote! { Ok(Self) }
            } else {
                quote! {
                    #(#steps)*
                    Ok(Self { #(#idents),* })
                }
            }
        }
        Data::Enum(data) => {
            let arms = data.variants.iter().enumerate().map(|(index, variant)| {
                let variant_name = &variant.ident;
                let variant_index = index as u8;

                match &variant.fields {
                    Fields::Unit => quote! {
                        #variant_index => Ok(Self::#variant_name)
                    },
                    Fields::Unnamed(fields) => {
                        let bindings: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| format_ident!("f{}", i))
                            .collect();
                        let steps = fields.unnamed.iter().zip(&bindings).map(|(f, ident)| {
                            let ty = &f.ty;
                            quote! {
                                let #ident = <#ty as crate::storage::encdec::Decode>::take(bytes)?;
                            }
                        });
                        quote! {
                            #variant_index => {
                                #(#steps)*
                                Ok(Self::#variant_name(#(#bindings),*))
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let bindings: Vec<_> = fields
                            .named
                            .iter()
                            .map(|f| f.ident.clone().unwrap())
                            .collect();
                        let steps = fields.named.iter().map(|f| {
                            let ident = &f.ident;
                            let ty = &f.ty;
                            quote! {
                                let #ident = <#ty as crate::storage::encdec::Decode>::take(bytes)?;
                            }
                        });
                        quote! {
                            #variant_index => {
                                #(#steps)*
                                Ok(Self::#variant_name { #(#bindings),* })
                            }
                        }
                    }
                }
            });

            quote! {
                let kind = <u8 as crate::storage::encdec::Decode>::take(bytes)?;
                match kind {
                    #(#arms,)*
                    other => Err(crate::CodecError::UnknownVariant(other)),
                }
            }
        }
        Data::Union(_) => {
            return syn::Error::new_spanned(name, "unions are not supported")
                .to_compile_error()
                .into();
        }
    };

    let output: TokenStream2 = quote! {
        impl crate::storage::encdec::Decode for #name {
            fn take(bytes: &mut &[u8]) -> Result<Self, crate::CodecError> {
                #body
            }
        }
    };

    output.into()
}

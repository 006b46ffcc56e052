use heck::ToSnakeCase;
use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, parse_macro_input};

pub(crate) fn derive_enum_value_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate_enum_value_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn generate_enum_value_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(name, "EnumValue can only be derived for enums"));
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "EnumValue cannot be derived for generic enums",
        ));
    }
    if let Some(variant) = data
        .variants
        .iter()
        .find(|variant| !matches!(variant.fields, Fields::Unit))
    {
        return Err(syn::Error::new_spanned(variant, "EnumValue requires field-less variants"));
    }

    let tag = find_type_tag(input)?.unwrap_or_else(|| create_type_tag(name));
    let variants = data.variants.iter().map(|variant| &variant.ident).collect::<Vec<_>>();

    Ok(quote! {
        impl ::retain::value::Value for #name {
            const KIND: ::retain::value::ValueKind = ::retain::value::ValueKind::Scalar;

            fn type_tag() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed(#tag)
            }

            fn encode(&self) -> ::retain::__private::anyhow::Result<::std::string::String> {
                let discriminant: i64 = match self {
                    #(Self::#variants => Self::#variants as i64,)*
                };

                Ok(discriminant.to_string())
            }

            fn decode(
                payload: &str,
                _: &::retain::session::Session,
            ) -> ::retain::__private::anyhow::Result<Self> {
                let discriminant: i64 = payload.trim().parse().map_err(|_| {
                    ::retain::__private::anyhow::anyhow!(
                        "`{}` is not a discriminant of {}", payload, #tag
                    )
                })?;

                #(
                    if discriminant == Self::#variants as i64 {
                        return Ok(Self::#variants);
                    }
                )*

                ::retain::__private::anyhow::bail!(
                    "no {} variant has discriminant {}", #tag, discriminant
                )
            }
        }
    })
}

/// `#[value(tag = "...")]` on the enum.
fn find_type_tag(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut tag = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("value")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("tag") {
                let lit: LitStr = meta.value()?.parse()?;
                let value = lit.value();
                if value.is_empty() || value.contains(':') {
                    return Err(meta.error("value tag must be non-empty and free of `:`"));
                }
                tag = Some(value);
                Ok(())
            } else {
                Err(meta.error("expected `tag = \"...\"`"))
            }
        })?;
    }

    Ok(tag)
}

fn create_type_tag(name: &syn::Ident) -> String {
    name.to_string().to_snake_case()
}

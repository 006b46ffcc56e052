use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, Ident, LitStr, parse_macro_input};

pub(crate) fn derive_host_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate_host_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

struct SlotField<'a> {
    ident: &'a Ident,
    ty: &'a syn::Type,
    name: String,
}

fn generate_host_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Host cannot be derived for generic types; the slot table is a single static",
        ));
    }

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(name, "Host can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(name, "Host requires named fields"));
    };

    let tag = find_type_tag(input)?.unwrap_or_else(|| name.to_string());
    let id_field = find_id_field(fields.named.iter())?
        .ok_or_else(|| {
            syn::Error::new_spanned(
                name,
                "Host requires an `id` field or a field marked #[host(id)]",
            )
        })?;
    let slots = find_slots(fields.named.iter())?;

    let slot_entries = slots.iter().map(|slot| {
        let SlotField { ident, ty, name } = slot;
        quote! {
            .with::<#ty>(
                #name,
                |host| ::std::clone::Clone::clone(&host.#ident),
                |host, value| host.#ident = value,
            )
        }
    });

    Ok(quote! {
        impl ::retain::host::Host for #name {
            const TYPE_TAG: &'static str = #tag;

            fn host_id(&self) -> &str {
                ::std::convert::AsRef::<str>::as_ref(&self.#id_field)
            }

            fn slots() -> &'static ::retain::host::SlotTable<Self> {
                static SLOTS: ::std::sync::LazyLock<::retain::host::SlotTable<#name>> =
                    ::std::sync::LazyLock::new(|| {
                        ::retain::host::SlotTable::<#name>::new()
                            #(#slot_entries)*
                    });

                &SLOTS
            }
        }
    })
}

/// `#[host(tag = "...")]` on the struct.
fn find_type_tag(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut tag = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("host")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("tag") {
                let lit: LitStr = meta.value()?.parse()?;
                let value = lit.value();
                if value.is_empty() || value.contains([':', '#', '|']) {
                    return Err(
                        meta.error("type tag must be non-empty and free of `:`, `#` and `|`")
                    );
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

/// The field marked `#[host(id)]`, else a field named `id`.
fn find_id_field<'a>(
    fields: impl Iterator<Item = &'a Field> + Clone,
) -> syn::Result<Option<&'a Ident>> {
    let mut marked = None;

    for field in fields.clone() {
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("host")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    if marked.is_some() {
                        return Err(meta.error("only one field can be #[host(id)]"));
                    }
                    marked = field.ident.as_ref();
                    Ok(())
                } else {
                    Err(meta.error("expected `id`"))
                }
            })?;
        }
    }

    if marked.is_some() {
        return Ok(marked);
    }

    Ok(fields
        .filter_map(|field| field.ident.as_ref())
        .find(|ident| *ident == "id"))
}

fn find_slots<'a>(fields: impl Iterator<Item = &'a Field>) -> syn::Result<Vec<SlotField<'a>>> {
    let mut slots = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };

        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("slot")) {
            let mut name = ident.to_string();

            if !matches!(attr.meta, syn::Meta::Path(_)) {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("name") {
                        let lit: LitStr = meta.value()?.parse()?;
                        name = lit.value();
                        Ok(())
                    } else {
                        Err(meta.error("expected `name = \"...\"`"))
                    }
                })?;
            }

            if name.is_empty() || name.contains(':') {
                return Err(syn::Error::new_spanned(
                    attr,
                    "slot name must be non-empty and free of `:`",
                ));
            }
            if slots.iter().any(|slot: &SlotField| slot.name == name) {
                return Err(syn::Error::new_spanned(attr, format!("duplicate slot `{name}`")));
            }

            slots.push(SlotField {
                ident,
                ty: &field.ty,
                name,
            });
        }
    }

    Ok(slots)
}

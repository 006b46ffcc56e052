// lib.rs - Root of macro crate
use proc_macro::TokenStream;

mod host;
mod value;

/// Implements `retain::host::Host` with a static slot table.
///
/// - `#[host(tag = "...")]` on the struct overrides the type tag (default: struct name).
/// - `#[host(id)]` marks the id field (default: a field named `id`).
/// - `#[slot]` or `#[slot(name = "...")]` exposes a field as a named slot.
#[proc_macro_derive(Host, attributes(host, slot))]
pub fn derive_host(input: TokenStream) -> TokenStream {
    host::derive_host_impl(input)
}

/// Implements `retain::value::Value` for a field-less enum, encoded as its
/// integer discriminant. `#[value(tag = "...")]` overrides the type tag
/// (default: snake case of the enum name).
#[proc_macro_derive(EnumValue, attributes(value))]
pub fn derive_enum_value(input: TokenStream) -> TokenStream {
    value::derive_enum_value_impl(input)
}

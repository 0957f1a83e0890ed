// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use proc_macro::TokenStream;
use quote::quote;

/// Marks a type as a payload that can travel over the target gateway's WebSocket
/// connection. Implemented as a derive so every inbound/outbound event struct gets
/// the marker trait without repeating an empty `impl` block.
#[proc_macro_derive(WebSocketEvent)]
pub fn websocket_event_macro_derive(input: TokenStream) -> TokenStream {
    let ast: syn::DeriveInput = syn::parse(input).unwrap();
    let name = &ast.ident;

    quote! {
        impl crate::target::events::WebSocketEvent for #name {}
    }
    .into()
}

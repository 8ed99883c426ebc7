use proc_macro2::TokenStream;
use quote::quote;
use syn::{ItemFn, LitStr};

pub fn default_name(func: &ItemFn) -> LitStr {
    let ident = &func.sig.ident;
    LitStr::new(&ident.to_string().replace('_', "-"), ident.span())
}

pub fn emit_registration(func: &ItemFn, name: Option<LitStr>) -> TokenStream {
    let ident = &func.sig.ident;
    let name = name.unwrap_or_else(|| default_name(func));
    quote! {
        #func
        #[doc(hidden)]
        const _: () = {
            const __COMPARE: mmg_livebind::ordering::HandleCompareFn = #ident;
            mmg_livebind::__inventory::submit! {
                mmg_livebind::ordering::OrderingRegistration { name: #name, compare: __COMPARE }
            }
        };
    }
}

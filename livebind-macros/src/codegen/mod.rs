mod emit;
mod msgs;
mod parse;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemFn};

use emit::emit_registration;
use parse::{check_signature, OrderingArgs};

pub fn entrypoint(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut parsed = OrderingArgs::default();
    let parser = syn::meta::parser(|meta| parsed.parse(meta));
    parse_macro_input!(args with parser);
    let func = parse_macro_input!(input as ItemFn);
    if let Err(e) = check_signature(&func) {
        return e.to_compile_error().into();
    }
    emit_registration(&func, parsed.name).into()
}

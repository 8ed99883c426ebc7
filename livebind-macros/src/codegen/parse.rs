use super::msgs::{
    ERR_ORDERING_ARITY, ERR_ORDERING_ASYNC, ERR_ORDERING_EMPTY_NAME, ERR_ORDERING_GENERIC,
    ERR_ORDERING_SELF, ERR_ORDERING_UNKNOWN_ARG,
};
use syn::{meta::ParseNestedMeta, FnArg, ItemFn, LitStr};

#[derive(Default)]
pub struct OrderingArgs {
    pub name: Option<LitStr>,
}

impl OrderingArgs {
    pub fn parse(&mut self, meta: ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("name") {
            let lit: LitStr = meta.value()?.parse()?;
            if lit.value().is_empty() {
                return Err(syn::Error::new_spanned(&lit, ERR_ORDERING_EMPTY_NAME));
            }
            self.name = Some(lit);
            Ok(())
        } else {
            Err(meta.error(ERR_ORDERING_UNKNOWN_ARG))
        }
    }
}

// 参数类型交给编译器检查（赋值给 HandleCompareFn 时报错），这里只拦截形态错误
pub fn check_signature(func: &ItemFn) -> syn::Result<()> {
    let sig = &func.sig;
    if let Some(a) = &sig.asyncness {
        return Err(syn::Error::new_spanned(a, ERR_ORDERING_ASYNC));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&sig.generics, ERR_ORDERING_GENERIC));
    }
    if let Some(FnArg::Receiver(r)) = sig.inputs.first() {
        return Err(syn::Error::new_spanned(r, ERR_ORDERING_SELF));
    }
    if sig.inputs.len() != 2 {
        return Err(syn::Error::new_spanned(&sig.inputs, ERR_ORDERING_ARITY));
    }
    Ok(())
}

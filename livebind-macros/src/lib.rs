use proc_macro::TokenStream;

mod codegen;

/// 注册一个具名的 handle 比较器，供 `TrackerConfig::comparator` 按名字选用。
///
/// ```ignore
/// #[mmg_livebind::ordering(name = "by-region")]
/// fn by_region(a: &Handle, b: &Handle) -> std::cmp::Ordering { .. }
/// ```
///
/// 省略 `name` 时使用函数名（下划线换成连字符）。
#[proc_macro_attribute]
pub fn ordering(args: TokenStream, input: TokenStream) -> TokenStream {
    codegen::entrypoint(args, input)
}

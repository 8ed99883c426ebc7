#[mmg_livebind::ordering]
async fn by_rank(a: &mmg_livebind::catalog::Handle, b: &mmg_livebind::catalog::Handle) -> std::cmp::Ordering {
    a.cmp(b)
}

fn main() {}

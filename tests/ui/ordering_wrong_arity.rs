#[mmg_livebind::ordering(name = "lonely")]
fn lonely(a: &mmg_livebind::catalog::Handle) -> std::cmp::Ordering {
    a.cmp(a)
}

fn main() {}

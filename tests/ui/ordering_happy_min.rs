use mmg_livebind::prelude::*;

#[mmg_livebind::ordering(name = "by-rank-desc")]
fn by_rank_desc(a: &Handle, b: &Handle) -> std::cmp::Ordering {
    b.ranking().cmp(&a.ranking())
}

fn main() {
    assert!(mmg_livebind::ordering::registered("by-rank-desc").is_some());
    assert!(OrderingPolicy::<str>::named("by-rank-desc").is_ok());
}

#[inline(never)]
fn answer(base: u64) -> u64 {
    base * 6 + 4
}

fn main() {
    let code = answer(std::env::args().count() as u64 + 5);
    std::process::exit((code % 256) as i32);
}

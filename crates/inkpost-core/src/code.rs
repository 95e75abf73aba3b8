use rand::Rng;

/// Number of digits in a one-time code.
pub const CODE_DIGITS: usize = 6;

/// Generates a uniformly random 6-digit numeric code.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let code: u32 = rng.gen_range(100_000..1_000_000);
    format!("{code:06}")
}

/// Constant-time byte comparison so code checks do not leak a matching prefix.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

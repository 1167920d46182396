use std::collections::BTreeSet;

/// Order- and duplicate-insensitive fuzzy score in `0..=100`.
///
/// Both sides are reduced to sorted sets of lowercase ASCII alphanumeric
/// tokens; non-ASCII characters are deleted, so `café` becomes `caf`. The
/// shared tokens form a common prefix, and the score is the best indel ratio
/// among `shared` vs `shared + only_a`, `shared` vs `shared + only_b`, and the
/// two combined strings against each other. A text whose tokens are a subset
/// of the other's scores 100. Halves round to even.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let left = processed(a);
    let right = processed(b);
    let left: BTreeSet<&str> = left.split_whitespace().collect();
    let right: BTreeSet<&str> = right.split_whitespace().collect();
    if left.is_empty() || right.is_empty() {
        return 0;
    }

    let shared = join(left.intersection(&right).copied());
    let only_left = join(left.difference(&right).copied());
    let only_right = join(right.difference(&left).copied());

    let combined_left = concat(&shared, &only_left);
    let combined_right = concat(&shared, &only_right);

    let best = [
        ratio(&shared, &combined_left),
        ratio(&shared, &combined_right),
        ratio(&combined_left, &combined_right),
    ]
    .into_iter()
    .fold(0.0_f64, f64::max);

    best.round_ties_even().clamp(0.0, 100.0) as u8
}

fn processed(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii)
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect()
}

fn join<'a>(tokens: impl Iterator<Item = &'a str>) -> String {
    tokens.collect::<Vec<_>>().join(" ")
}

fn concat(shared: &str, rest: &str) -> String {
    match (shared.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => shared.to_string(),
        _ => format!("{shared} {rest}"),
    }
}

/// `200 * lcs / (|a| + |b|)`, i.e. normalized indel similarity as a percentage.
fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }
    200.0 * lcs_len(&a, &b) as f64 / total as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

//! Partial-ratio string similarity
//!
//! Scores how well the shorter string appears somewhere inside the longer
//! one, on a 0-100 scale. Every window of the longer string that is as
//! long as the shorter one (truncated at the end of the text) is compared
//! with normalized Levenshtein similarity and the best window wins.

use std::collections::HashMap;

/// Whole-string similarity on a 0-100 scale (case-insensitive)
pub fn ratio(a: &str, b: &str) -> u8 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    to_score(strsim::normalized_levenshtein(&a, &b))
}

/// Best similarity of the shorter string against any window of the longer
/// (case-insensitive, 0-100). Empty input scores 0.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return 0;
    }

    let needle: String = short.iter().collect();
    if short.len() == long.len() {
        let hay: String = long.iter().collect();
        return to_score(strsim::normalized_levenshtein(&needle, &hay));
    }

    let width = short.len();
    let mut bag = CharBag::new(&short);
    for &c in &long[..width] {
        bag.add(c);
    }

    let mut window = String::with_capacity(needle.len());
    let mut best = 0.0f64;
    for start in 0..long.len() {
        if start > 0 {
            bag.remove(long[start - 1]);
            if let Some(&c) = long.get(start + width - 1) {
                bag.add(c);
            }
        }

        // Levenshtein distance is at least `width - overlap`, so this
        // bounds the window's similarity from above
        let bound = bag.overlap as f64 / width as f64;
        if bound + 1e-9 < best {
            continue;
        }

        let end = (start + width).min(long.len());
        window.clear();
        window.extend(&long[start..end]);
        let score = strsim::normalized_levenshtein(&needle, &window);
        if score > best {
            best = score;
            if best >= 1.0 {
                break;
            }
        }
    }

    to_score(best)
}

/// Multiset overlap between the needle and a sliding window
struct CharBag {
    wanted: HashMap<char, usize>,
    held: HashMap<char, usize>,
    overlap: usize,
}

impl CharBag {
    fn new(needle: &[char]) -> Self {
        let mut wanted = HashMap::new();
        for &c in needle {
            *wanted.entry(c).or_insert(0) += 1;
        }
        Self {
            wanted,
            held: HashMap::new(),
            overlap: 0,
        }
    }

    fn add(&mut self, c: char) {
        let held = self.held.entry(c).or_insert(0);
        if *held < self.wanted.get(&c).copied().unwrap_or(0) {
            self.overlap += 1;
        }
        *held += 1;
    }

    fn remove(&mut self, c: char) {
        if let Some(held) = self.held.get_mut(&c) {
            *held -= 1;
            if *held < self.wanted.get(&c).copied().unwrap_or(0) {
                self.overlap -= 1;
            }
        }
    }
}

fn to_score(similarity: f64) -> u8 {
    (similarity * 100.0).round().clamp(0.0, 100.0) as u8
}

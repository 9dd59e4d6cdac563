//! Lexicographically sortable 128-bit ids (spec §4.10).
//!
//! Grounded on the original `id57` helper: base57-encode the current
//! millisecond timestamp, base57-encode a fresh UUIDv4, concatenate. The
//! original did not pad either half, which means its ids only sort
//! correctly by *creation order* for ids minted in the same calendar
//! year-ish range where the encoded timestamp happens to have a stable
//! digit width — a shorter encoding sorts before a longer one of the same
//! prefix even when its value is larger (`"AB"` < `"B"` lexicographically
//! despite decoding to a smaller number only some of the time). Fixed here
//! by zero-padding both halves to a fixed width, which is what makes the
//! id actually lexicographically sortable rather than sortable-by-accident.

const BASE57_ALPHABET: &[u8; 57] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Width of the base57-encoded millisecond timestamp. `57^8` covers well
/// over a million years of millisecond timestamps from the epoch —
/// comfortably more than any deployment's lifetime — while keeping the
/// total id at a fixed 30 characters alongside the UUID half.
const TIMESTAMP_WIDTH: usize = 8;

/// Width of the base57-encoded 128-bit UUID. `57^22 > 2^128`, so 22
/// characters always suffice without truncation.
const UUID_WIDTH: usize = 22;

fn base57_encode_padded(mut value: u128, width: usize) -> String {
    let mut chars = vec![b'A'; width];
    let base = BASE57_ALPHABET.len() as u128;
    for slot in chars.iter_mut().rev() {
        *slot = BASE57_ALPHABET[(value % base) as usize];
        value /= base;
    }
    String::from_utf8(chars).expect("base57 alphabet is ASCII")
}

/// Generates a new id57: a 30-character string that sorts lexicographically
/// in creation order and embeds a UUIDv4 for global uniqueness.
pub fn generate() -> String {
    let timestamp_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis();
    let uuid = uuid::Uuid::new_v4();
    format!(
        "{}{}",
        base57_encode_padded(timestamp_ms, TIMESTAMP_WIDTH),
        base57_encode_padded(uuid.as_u128(), UUID_WIDTH)
    )
}

/// `true` if `id` has the shape id57 produces — useful for validating path
/// parameters before a lookup hits the database.
pub fn looks_like_id57(id: &str) -> bool {
    id.len() == TIMESTAMP_WIDTH + UUID_WIDTH
        && id.bytes().all(|b| BASE57_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_the_expected_width() {
        let id = generate();
        assert_eq!(id.len(), TIMESTAMP_WIDTH + UUID_WIDTH);
        assert!(looks_like_id57(&id));
    }

    #[test]
    fn ids_generated_in_sequence_sort_lexicographically() {
        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(generate());
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn padded_encoding_never_shrinks_below_its_width() {
        assert_eq!(base57_encode_padded(0, TIMESTAMP_WIDTH).len(), TIMESTAMP_WIDTH);
        assert_eq!(
            base57_encode_padded(u128::MAX, UUID_WIDTH).len(),
            UUID_WIDTH
        );
    }

    #[test]
    fn looks_like_id57_rejects_wrong_lengths_and_alphabets() {
        assert!(!looks_like_id57("too-short"));
        assert!(!looks_like_id57(&"l".repeat(TIMESTAMP_WIDTH + UUID_WIDTH)));
    }
}

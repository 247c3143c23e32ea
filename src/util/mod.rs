use web_time::{SystemTime, UNIX_EPOCH};

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 20;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// 20 alphanumeric characters, the same shape the hosted store hands out.
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_LEN];
    if getrandom::getrandom(&mut bytes).is_err() {
        // Entropy unavailable: derive from the clock.
        let seed = now_ms().to_le_bytes();
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = seed[i % seed.len()].wrapping_add(i as u8);
        }
    }
    bytes
        .iter()
        .map(|b| ID_ALPHABET[*b as usize % ID_ALPHABET.len()] as char)
        .collect()
}

pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

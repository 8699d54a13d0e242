//! Deterministic, seedable id generation (the Alea PRNG).
//!
//! `Alea` is a small, non-cryptographic generator built from three `f64`
//! state variables plus a carry, seeded through the `Mash` hash. It is bit
//! compatible with the reference implementation: given the same seed inputs
//! it produces the same draw sequence on any platform, which is what lets a
//! method invocation's `randomSeed` reproduce identical ids on client and
//! server for optimistic UI.
//!
//! `IdGenerator` wraps an `Alea` instance to draw 17-character opaque ids
//! from the "unmistakable" alphabet (digits/letters with visually
//! ambiguous characters such as `0`, `1`, `I`, `O`, `l` removed).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Alphabet used for opaque session/subscription/record ids: digits and
/// letters with visually ambiguous characters removed.
pub const UNMISTAKABLE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTWXYZabcdefghijkmnopqrstuvwxyz";

/// Mash hashing algorithm used to seed `Alea`'s internal state.
///
/// Each call folds the bytes of `data` into the running state `n` and
/// returns `n` scaled into `[0, 1)`. Successive calls on the same `Mash`
/// continue from the previous state.
struct Mash {
    n: f64,
}

impl Mash {
    fn new() -> Self {
        Self { n: 0xefc8249d_u32 as f64 }
    }

    fn hash(&mut self, data: &[u8]) -> f64 {
        for &byte in data {
            self.n += byte as f64;
            let mut h = 0.025_196_032_824_169_38 * self.n;
            self.n = h.floor();
            h -= self.n;
            h *= self.n;
            self.n = h.floor();
            h -= self.n;
            self.n += h * 4_294_967_296.0; // 2^32
        }
        self.n * 2.328_306_436_538_696_3e-10 // 2^-32
    }
}

/// Alea stateful PRNG: three `f64` state words plus a carry, seeded from an
/// arbitrary sequence of string inputs via `Mash`.
pub struct Alea {
    c: f64,
    s0: f64,
    s1: f64,
    s2: f64,
}

impl Alea {
    /// Seed a new generator deterministically from a sequence of values.
    /// Each value is hashed by its string form, matching the reference
    /// implementation's treatment of mixed int/str seed arguments.
    pub fn from_seeds(seeds: &[&str]) -> Self {
        let mut mash = Mash::new();
        let c = 1.0;
        let mut s0 = mash.hash(b" ");
        let mut s1 = mash.hash(b" ");
        let mut s2 = mash.hash(b" ");

        for val in seeds {
            s0 -= mash.hash(val.as_bytes());
            if s0 < 0.0 {
                s0 += 1.0;
            }
            s1 -= mash.hash(val.as_bytes());
            if s1 < 0.0 {
                s1 += 1.0;
            }
            s2 -= mash.hash(val.as_bytes());
            if s2 < 0.0 {
                s2 += 1.0;
            }
        }

        Self { c, s0, s1, s2 }
    }

    /// Seed from whatever ambient, non-deterministic entropy the process
    /// has on hand (wall clock, a process-local counter, and the address of
    /// a stack value, which ASLR randomizes). Good enough for opaque ids;
    /// not a cryptographic primitive.
    pub fn from_entropy() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let stack_marker = &counter as *const _ as usize;
        Self::from_seeds(&[
            &nanos.to_string(),
            &counter.to_string(),
            &stack_marker.to_string(),
        ])
    }

    /// Return the internal state, exposed only for bit-exactness tests.
    #[cfg(test)]
    fn state(&self) -> (f64, f64, f64) {
        (self.s0, self.s1, self.s2)
    }

    /// Draw the next pseudo-random number in `[0, 1)`, advancing state.
    pub fn next_f64(&mut self) -> f64 {
        let t = 2_091_639.0 * self.s0 + self.c * 2.328_306_436_538_696_3e-10;
        self.c = t.floor();
        self.s0 = self.s1;
        self.s1 = self.s2;
        self.s2 = t - self.c;
        self.s2
    }

    fn choice(&mut self, alphabet: &[u8]) -> u8 {
        let idx = (self.next_f64() * alphabet.len() as f64) as usize;
        alphabet[idx.min(alphabet.len() - 1)]
    }

    /// Draw a string of `length` characters chosen (with replacement) from
    /// `alphabet`.
    pub fn random_string(&mut self, length: usize, alphabet: &[u8]) -> String {
        (0..length)
            .map(|_| self.choice(alphabet) as char)
            .collect()
    }
}

/// Draws opaque 17-character ids from the unmistakable alphabet.
pub struct IdGenerator {
    alea: Alea,
}

impl IdGenerator {
    /// A generator seeded from process entropy, for ids with no
    /// cross-process reproducibility requirement.
    pub fn new() -> Self {
        Self {
            alea: Alea::from_entropy(),
        }
    }

    /// A generator deterministically seeded from a stream key and a
    /// client-supplied `randomSeed`, so that client and server draw the
    /// same id sequence for the same method invocation.
    pub fn from_random_seed(stream: &str, random_seed: &str) -> Self {
        Self {
            alea: Alea::from_seeds(&[stream, random_seed]),
        }
    }

    /// Draw the next opaque 17-character id.
    pub fn next_id(&mut self) -> String {
        self.alea.random_string(17, UNMISTAKABLE_ALPHABET)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn mash_reference_vectors() {
        let mut mash = Mash::new();
        assert_close(mash.hash(b" "), 0.8633289230056107);
        assert_close(mash.hash(b" "), 0.15019597788341343);
        assert_close(mash.hash(b" "), 0.9176952994894236);
    }

    #[test]
    fn alea_seeded_state_matches_reference() {
        let alea = Alea::from_seeds(&["my", "3", "seeds"]);
        let (s0, s1, s2) = alea.state();
        assert_close(s0, 0.23922116006724536);
        assert_close(s1, 0.6147655111271888);
        assert_close(s2, 0.3493568613193929);
    }

    #[test]
    fn alea_draw_sequence_matches_reference() {
        let mut alea = Alea::from_seeds(&["my", "3", "seeds"]);
        assert_close(alea.next_f64(), 0.30802189325913787);
        assert_close(alea.next_f64(), 0.5190450621303171);
        assert_close(alea.next_f64(), 0.43635262292809784);
    }

    #[test]
    fn alea_is_deterministic_across_instances() {
        let mut a = Alea::from_seeds(&["my", "3", "seeds"]);
        let mut b = Alea::from_seeds(&["my", "3", "seeds"]);
        for _ in 0..10 {
            assert_close(a.next_f64(), b.next_f64());
        }
    }

    #[test]
    fn unmistakable_string_draws_match_reference() {
        let mut alea = Alea::from_seeds(&["my", "3", "seeds"]);
        let expected = [
            "JYRduBwQtjpeCkqP7",
            "HLxYtpZBtSain84zj",
            "s9XrbWaDC4yCL5NCW",
            "SCiymgNnZpwda9vSH",
            "hui3ThSoZrFrdFDTT",
        ];
        for want in expected {
            assert_eq!(alea.random_string(17, UNMISTAKABLE_ALPHABET), want);
        }
    }

    #[test]
    fn id_generator_draws_seventeen_chars_from_unmistakable_alphabet() {
        let mut gen = IdGenerator::from_random_seed("stream", "seed-1");
        let id = gen.next_id();
        assert_eq!(id.len(), 17);
        assert!(id.bytes().all(|b| UNMISTAKABLE_ALPHABET.contains(&b)));
    }

    #[test]
    fn same_random_seed_yields_same_id_sequence() {
        let mut a = IdGenerator::from_random_seed("methods/do-thing", "abc123");
        let mut b = IdGenerator::from_random_seed("methods/do-thing", "abc123");
        assert_eq!(a.next_id(), b.next_id());
        assert_eq!(a.next_id(), b.next_id());
    }

    #[test]
    fn entropy_seeded_generators_diverge() {
        let mut a = IdGenerator::new();
        let mut b = IdGenerator::new();
        assert_ne!(a.next_id(), b.next_id());
    }
}

//! Order-sensitive content hashing for change detection.
//!
//! Everything the build engine compares across runs (documents, handler
//! configurations, queries) reduces to a [`Fingerprint`]: an append-only
//! accumulator of typed values finalized to a short hex identity string.
//! Equal value sequences always produce equal output; any change to a
//! combined value changes the output. This is a change detector, not a
//! security primitive.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Number of digest bytes kept in the finalized identity string.
const FINGERPRINT_BYTES: usize = 16;

// Type tags keep adjacent pushes from aliasing: pushing ("ab", "c") must
// not equal pushing ("a", "bc"), and an i64 must not equal its string form.
const TAG_STR: u8 = 0x01;
const TAG_I64: u8 = 0x02;
const TAG_U64: u8 = 0x03;
const TAG_F64: u8 = 0x04;
const TAG_BOOL: u8 = 0x05;
const TAG_TIMESTAMP: u8 = 0x06;
const TAG_NONE: u8 = 0x07;
const TAG_NESTED: u8 = 0x08;
const TAG_SEQ: u8 = 0x09;
const TAG_MAP: u8 = 0x0a;

/// An append-only hash combinator. Callers push values in a caller-chosen
/// but deterministic order and call [`Fingerprint::finish`].
#[derive(Clone)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprint {
    pub fn new() -> Self {
        Fingerprint {
            hasher: Sha256::new(),
        }
    }

    fn tagged(&mut self, tag: u8, payload: &[u8]) {
        self.hasher.update([tag]);
        self.hasher.update((payload.len() as u64).to_le_bytes());
        self.hasher.update(payload);
    }

    pub fn push_str(&mut self, value: &str) {
        self.tagged(TAG_STR, value.as_bytes());
    }

    pub fn push_i64(&mut self, value: i64) {
        self.tagged(TAG_I64, &value.to_le_bytes());
    }

    pub fn push_u64(&mut self, value: u64) {
        self.tagged(TAG_U64, &value.to_le_bytes());
    }

    pub fn push_f64(&mut self, value: f64) {
        // Bit pattern, so -0.0 and 0.0 stay distinguishable and NaN is stable.
        self.tagged(TAG_F64, &value.to_bits().to_le_bytes());
    }

    pub fn push_bool(&mut self, value: bool) {
        self.tagged(TAG_BOOL, &[value as u8]);
    }

    /// Combine a unix timestamp (seconds).
    pub fn push_timestamp(&mut self, secs: i64) {
        self.tagged(TAG_TIMESTAMP, &secs.to_le_bytes());
    }

    /// Explicit absence marker, so `(None, "x")` differs from `("x",)`.
    pub fn push_none(&mut self) {
        self.tagged(TAG_NONE, &[]);
    }

    pub fn push_opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(v) => self.push_str(v),
            None => self.push_none(),
        }
    }

    pub fn push_opt_timestamp(&mut self, value: Option<i64>) {
        match value {
            Some(v) => self.push_timestamp(v),
            None => self.push_none(),
        }
    }

    /// Combine a nested fingerprintable value. The nested value hashes into
    /// its own digest first, so its internal structure cannot splice into
    /// this accumulator's value stream.
    pub fn push_nested<T: Fingerprinted + ?Sized>(&mut self, value: &T) {
        let mut nested = Fingerprint::new();
        value.fingerprint_into(&mut nested);
        let digest = nested.hasher.finalize();
        self.tagged(TAG_NESTED, &digest);
    }

    /// Combine an ordered sequence, preserving element order.
    pub fn push_seq<'a, T, I>(&mut self, values: I)
    where
        T: Fingerprinted + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut count: u64 = 0;
        let mut seq = Fingerprint::new();
        for value in values {
            seq.push_nested(value);
            count += 1;
        }
        self.tagged(TAG_SEQ, &count.to_le_bytes());
        let digest = seq.hasher.finalize();
        self.tagged(TAG_NESTED, &digest);
    }

    /// Combine a key/value map. Iteration order is canonicalized by key, so
    /// the hash is independent of the map's internal ordering.
    pub fn push_map<K, V>(&mut self, map: &BTreeMap<K, V>)
    where
        K: Ord + AsRef<str>,
        V: Fingerprinted,
    {
        let mut inner = Fingerprint::new();
        for (key, value) in map {
            inner.push_str(key.as_ref());
            inner.push_nested(value);
        }
        self.tagged(TAG_MAP, &(map.len() as u64).to_le_bytes());
        let digest = inner.hasher.finalize();
        self.tagged(TAG_NESTED, &digest);
    }

    /// Finalize to the short opaque identity string.
    pub fn finish(self) -> String {
        let digest = self.hasher.finalize();
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}

/// Values that contribute their semantically significant fields to a
/// [`Fingerprint`] in a fixed order.
pub trait Fingerprinted {
    fn fingerprint_into(&self, fp: &mut Fingerprint);

    /// Standalone identity string for this value.
    fn fingerprint(&self) -> String {
        let mut fp = Fingerprint::new();
        self.fingerprint_into(&mut fp);
        fp.finish()
    }
}

impl Fingerprinted for String {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        fp.push_str(self);
    }
}

impl Fingerprinted for &str {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        fp.push_str(self);
    }
}

impl Fingerprinted for i64 {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        fp.push_i64(*self);
    }
}

impl Fingerprinted for bool {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        fp.push_bool(*self);
    }
}

impl Fingerprinted for serde_json::Value {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        match self {
            serde_json::Value::Null => fp.push_none(),
            serde_json::Value::Bool(b) => fp.push_bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    fp.push_i64(i);
                } else if let Some(u) = n.as_u64() {
                    fp.push_u64(u);
                } else {
                    fp.push_f64(n.as_f64().unwrap_or(f64::NAN));
                }
            }
            serde_json::Value::String(s) => fp.push_str(s),
            serde_json::Value::Array(items) => fp.push_seq(items.iter()),
            serde_json::Value::Object(map) => {
                // serde_json maps may preserve insertion order; sort keys so
                // serialization order never leaks into the hash.
                let sorted: BTreeMap<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                fp.push_map(&sorted);
            }
        }
    }
}

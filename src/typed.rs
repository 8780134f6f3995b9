//! Typed-value helpers (C9): encode/decode/merge triples lifted to the
//! bytes-level [`MergeFn`] signature the core consumes (§4.5, §9's
//! "Dynamic value domain" note).

use std::sync::Arc;

use crate::merge::MergeFn;

/// A typed content handler: encode a value to bytes, decode it back, and
/// merge three decoded values. [`ContentType::into_merge_fn`] lifts this
/// to the bytes-level signature `View::set_merge_fn` expects.
pub trait ContentType: Send + Sync + 'static {
    type Value;

    fn encode(&self, value: &Self::Value) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, String>;
    fn merge(&self, old: Option<Self::Value>, ours: Self::Value, theirs: Self::Value) -> Self::Value;

    /// Lift this typed merge into a bytes-level [`MergeFn`]. `ours`/`theirs`
    /// being `None` (one side removed the key) decodes to `None` on the
    /// typed side; a content type with no sensible "absent" value should
    /// treat that as a decode failure propagated as a resolver error.
    fn into_merge_fn(self) -> MergeFn
    where
        Self: Sized,
    {
        let this = Arc::new(self);
        Arc::new(move |old, ours, theirs| {
            let old_val = match old {
                Some(b) => Some(this.decode(b)?),
                None => None,
            };
            let our_val = match ours {
                Some(b) => this.decode(b)?,
                None => return Err("counter/typed merge requires a value on our side".to_string()),
            };
            let their_val = match theirs {
                Some(b) => this.decode(b)?,
                None => return Err("counter/typed merge requires a value on their side".to_string()),
            };
            Ok(this.encode(&this.merge(old_val, our_val, their_val)))
        })
    }
}

/// A `u64` counter encoded as decimal ASCII, merged commutatively:
/// `merged = ours + theirs - old_or_zero`.
struct Counter;

impl ContentType for Counter {
    type Value = u64;

    fn encode(&self, value: &u64) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<u64, String> {
        std::str::from_utf8(bytes)
            .map_err(|e| e.to_string())?
            .parse::<u64>()
            .map_err(|e| e.to_string())
    }

    fn merge(&self, old: Option<u64>, ours: u64, theirs: u64) -> u64 {
        let base = old.unwrap_or(0);
        (ours + theirs).saturating_sub(base)
    }
}

/// A merge function implementing the counter content type directly
/// (bytes-level, matching `Versioned.set_merge_fn`'s expected signature
/// without requiring callers to go through [`ContentType`]).
pub fn counter() -> MergeFn {
    Counter.into_merge_fn()
}

struct LastWriterWins;

impl ContentType for LastWriterWins {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Vec<u8> {
        value.clone()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, String> {
        Ok(bytes.to_vec())
    }

    fn merge(&self, _old: Option<Vec<u8>>, _ours: Vec<u8>, theirs: Vec<u8>) -> Vec<u8> {
        theirs
    }
}

/// Last-writer-wins: always resolves to the head-side (`theirs`) bytes.
pub fn last_writer_wins() -> MergeFn {
    Arc::new(|_old, _ours, theirs| Ok(theirs.unwrap_or_default().to_vec()))
}

/// A JSON-encoded content type with a caller-supplied combiner over the
/// decoded `serde_json::Value`s — there's no universal "merge two JSON
/// values" rule, so unlike [`counter`] this always takes an explicit
/// combiner.
pub fn json_merge(
    combine: impl Fn(Option<serde_json::Value>, serde_json::Value, serde_json::Value) -> serde_json::Value
        + Send
        + Sync
        + 'static,
) -> MergeFn {
    Arc::new(move |old, ours, theirs| {
        let decode = |b: &[u8]| -> Result<serde_json::Value, String> {
            serde_json::from_slice(b).map_err(|e| e.to_string())
        };
        let old_val = old.map(decode).transpose()?;
        let our_val = ours.ok_or("json merge requires a value on our side")?;
        let their_val = theirs.ok_or("json merge requires a value on their side")?;
        let merged = combine(old_val, decode(our_val)?, decode(their_val)?);
        serde_json::to_vec(&merged).map_err(|e| e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_merges_commutatively() {
        let fn1 = counter();
        let merged_ab = fn1(Some(b"10"), Some(b"15"), Some(b"20")).unwrap();
        let fn2 = counter();
        let merged_ba = fn2(Some(b"10"), Some(b"20"), Some(b"15")).unwrap();
        assert_eq!(merged_ab, merged_ba);
        assert_eq!(std::str::from_utf8(&merged_ab).unwrap(), "25");
    }

    #[test]
    fn counter_defaults_old_to_zero() {
        let f = counter();
        let merged = f(None, Some(b"3"), Some(b"4")).unwrap();
        assert_eq!(std::str::from_utf8(&merged).unwrap(), "7");
    }

    #[test]
    fn last_writer_wins_takes_theirs() {
        let f = last_writer_wins();
        let merged = f(Some(b"old"), Some(b"ours"), Some(b"theirs")).unwrap();
        assert_eq!(merged, b"theirs");
    }

    #[test]
    fn json_merge_invokes_combiner() {
        let f = json_merge(|_old, ours, theirs| {
            let mut merged = ours.as_object().cloned().unwrap_or_default();
            if let Some(obj) = theirs.as_object() {
                for (k, v) in obj {
                    merged.insert(k.clone(), v.clone());
                }
            }
            serde_json::Value::Object(merged)
        });
        let merged = f(None, Some(br#"{"a":1}"#), Some(br#"{"b":2}"#)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&merged).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], 2);
    }
}

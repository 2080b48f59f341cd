//! Removal of secret values from inventory artifacts once a run is over.

use std::fs;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use serde_json::Value;
use tracing::debug;

/// Keys removed at any depth.
pub const DENYLIST: &[&str] = &["secret", "ansible_password"];

/// Strips [`DENYLIST`] keys from inventory documents. Disabled in debug mode
/// so real credentials can be inspected while troubleshooting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scrubber {
    debug_dev: bool,
}

impl Scrubber {
    #[must_use]
    pub fn new(debug_dev: bool) -> Self {
        Self { debug_dev }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.debug_dev
    }

    /// Rewrites the JSON document at `path` without denylisted keys.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, parsed or written back.
    pub fn scrub_file(&self, path: &Utf8Path) -> Result<()> {
        if !self.is_enabled() {
            debug!(%path, "debug mode, leaving secrets in place");
            return Ok(());
        }

        let raw = fs::read(path).with_context(|| format!("unable to read {path}"))?;
        let mut doc: Value =
            serde_json::from_slice(&raw).with_context(|| format!("unable to parse {path}"))?;
        delete_keys(&mut doc, DENYLIST);
        let out = serde_json::to_vec_pretty(&doc)?;
        fs::write(path, out).with_context(|| format!("unable to write {path}"))?;
        debug!(%path, "scrubbed inventory");
        Ok(())
    }
}

/// Recursively removes `keys` from every object in `value`, including objects
/// nested in arrays.
pub fn delete_keys(value: &mut Value, keys: &[&str]) {
    match value {
        Value::Object(map) => {
            map.retain(|k, _| !keys.contains(&k.as_str()));
            for v in map.values_mut() {
                delete_keys(v, keys);
            }
        }
        Value::Array(items) => {
            for v in items {
                delete_keys(v, keys);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn contains_denylisted(value: &Value) -> bool {
        match value {
            Value::Object(map) => map
                .iter()
                .any(|(k, v)| DENYLIST.contains(&k.as_str()) || contains_denylisted(v)),
            Value::Array(items) => items.iter().any(contains_denylisted),
            _ => false,
        }
    }

    #[test]
    fn delete_keys_works() {
        let mut doc = json!({
            "all": {"hosts": {"web-1": {
                "ansible_password": "pw",
                "ansible_user": "root",
                "account": {"secret": "pw", "username": "root"},
                "list": [{"secret": 1}, 2]
            }}}
        });
        delete_keys(&mut doc, DENYLIST);
        let should = json!({
            "all": {"hosts": {"web-1": {
                "ansible_user": "root",
                "account": {"username": "root"},
                "list": [{}, 2]
            }}}
        });
        assert_eq!(doc, should);
    }

    #[test]
    fn scrub_file_works() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(tmp.path()).unwrap().join("hosts.json");
        fs::write(&path, r#"{"all": {"hosts": {"a": {"ansible_password": "pw"}}}}"#).unwrap();

        Scrubber::new(false).scrub_file(&path).unwrap();
        let once = fs::read_to_string(&path).unwrap();
        Scrubber::new(false).scrub_file(&path).unwrap();
        let twice = fs::read_to_string(&path).unwrap();

        assert!(!once.contains("pw"));
        assert_eq!(once, twice);
    }

    #[test]
    fn debug_mode_skips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(tmp.path()).unwrap().join("hosts.json");
        let raw = r#"{"secret": "pw"}"#;
        fs::write(&path, raw).unwrap();

        Scrubber::new(true).scrub_file(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), raw);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let key = prop_oneof![
            Just("secret".to_owned()),
            Just("ansible_password".to_owned()),
            "[a-z_]{1,8}",
        ]
        .boxed();
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ];
        leaf.prop_recursive(4, 64, 6, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(key.clone(), inner, 0..5)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn delete_keys_is_idempotent(doc in arb_json()) {
            let mut once = doc.clone();
            delete_keys(&mut once, DENYLIST);
            let mut twice = once.clone();
            delete_keys(&mut twice, DENYLIST);

            prop_assert!(!contains_denylisted(&once));
            prop_assert_eq!(once, twice);
        }
    }
}

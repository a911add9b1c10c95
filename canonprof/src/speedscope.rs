//! Import of canonical JSON (the speedscope file format).

use crate::Result;
use canonprof_model::ProfileGroup;
use canonprof_model::file_format::{CanonicalFile, FileFormatError, SCHEMA_URL};
use serde_json::Value;

pub fn looks_like(value: &Value) -> bool {
    value.get("$schema").and_then(Value::as_str) == Some(SCHEMA_URL)
}

pub fn import(value: &Value) -> Result<Option<ProfileGroup>> {
    let file = CanonicalFile::from_value(value)?;
    match file.to_profile_group() {
        Ok(group) => Ok(Some(group)),
        Err(FileFormatError::NoProfiles) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognises_schema() {
        assert!(looks_like(&json!({"$schema": SCHEMA_URL})));
        assert!(!looks_like(&json!({"$schema": "https://example.com"})));
        assert!(!looks_like(&json!([1, 2])));
    }

    #[test]
    fn imports_sampled_file() {
        let value = json!({
            "$schema": SCHEMA_URL,
            "shared": {"frames": [{"name": "a"}, {"name": "b"}]},
            "profiles": [{
                "type": "sampled", "name": "p", "unit": "bytes",
                "startValue": 0, "endValue": 3,
                "samples": [[0, 1], [0]], "weights": [2, 1]
            }]
        });
        let group = import(&value).unwrap().unwrap();
        let profile = group.default_profile();
        assert_eq!(profile.total_weight(), 3.0);
        assert_eq!(profile.frame_by_name("a").unwrap().self_weight(), 1.0);
    }

    #[test]
    fn empty_file_has_no_profile() {
        let value = json!({"$schema": SCHEMA_URL, "shared": {"frames": []}, "profiles": []});
        assert!(import(&value).unwrap().is_none());
    }
}

// Copyright 2026 The Lattice Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Canonical JSON encoding.
//!
//! Every signature in this crate is created over the canonical form of a JSON
//! object: minified, with object keys sorted by their UTF-8 byte values and
//! with floats rejected outright. Two semantically equal objects canonicalize
//! to the same bytes no matter how they were constructed, which is what makes
//! a signature over them meaningful in the first place.

use serde_json::Value;
use thiserror::Error;

/// The largest integer value allowed in canonical JSON, 2^53 - 1.
///
/// Integers outside of `[-MAX_SAFE_INTEGER, MAX_SAFE_INTEGER]` can't be
/// represented exactly by all JSON implementations, so a signature over them
/// wouldn't be portable.
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Error for JSON values that have no canonical form.
#[derive(Debug, Error)]
pub enum CanonicalJsonError {
    /// The value contains a float or an integer outside of the safe range.
    #[error("floats and integers outside of the safe range have no canonical JSON form")]
    InvalidNumber,

    /// The value couldn't be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Encode the given JSON value into its canonical string form.
pub fn canonical_json(value: &Value) -> Result<String, CanonicalJsonError> {
    let mut output = String::new();
    write_value(value, &mut output)?;

    Ok(output)
}

fn write_value(value: &Value, output: &mut String) -> Result<(), CanonicalJsonError> {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

            output.push('{');

            for (i, key) in keys.iter().enumerate() {
                if i != 0 {
                    output.push(',');
                }

                output.push_str(&serde_json::to_string(key)?);
                output.push(':');
                write_value(&object[*key], output)?;
            }

            output.push('}');
        }
        Value::Array(values) => {
            output.push('[');

            for (i, value) in values.iter().enumerate() {
                if i != 0 {
                    output.push(',');
                }

                write_value(value, output)?;
            }

            output.push(']');
        }
        Value::Number(_) => {
            let number = value
                .as_i64()
                .filter(|n| n.checked_abs().is_some_and(|n| n <= MAX_SAFE_INTEGER))
                .ok_or(CanonicalJsonError::InvalidNumber)?;

            output.push_str(&number.to_string());
        }
        value => output.push_str(&serde_json::to_string(value)?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn sorts_keys_and_minifies() {
        let value = json!({
            "one": 1,
            "auth": {
                "success": false,
                "mxid": "@john.doe:example.com",
                "profile": {
                    "display_name": "John Doe",
                    "three_pids": [
                        { "medium": "email", "address": "john.doe@example.org" },
                        { "medium": "msisdn", "address": "123456789" }
                    ]
                }
            }
        });

        assert_eq!(
            canonical_json(&value).unwrap(),
            "{\"auth\":{\"mxid\":\"@john.doe:example.com\",\"profile\":{\"display_name\":\
             \"John Doe\",\"three_pids\":[{\"address\":\"john.doe@example.org\",\"medium\":\
             \"email\"},{\"address\":\"123456789\",\"medium\":\"msisdn\"}]},\"success\":false},\
             \"one\":1}"
        );
    }

    #[test]
    fn construction_order_does_not_matter() {
        let first = json!({ "b": 2, "a": 1, "nested": { "y": [3, 2], "x": "z" } });
        let second = json!({ "nested": { "x": "z", "y": [3, 2] }, "a": 1, "b": 2 });

        assert_eq!(canonical_json(&first).unwrap(), canonical_json(&second).unwrap());
    }

    #[test]
    fn unicode_and_empty_values() {
        assert_eq!(canonical_json(&json!({})).unwrap(), "{}");
        assert_eq!(canonical_json(&json!({ "a": [] })).unwrap(), "{\"a\":[]}");
        assert_eq!(
            canonical_json(&json!({ "a": "日本語" })).unwrap(),
            "{\"a\":\"日本語\"}"
        );
    }

    #[test]
    fn floats_are_rejected() {
        assert_matches!(
            canonical_json(&json!({ "answer": 1.1 })),
            Err(CanonicalJsonError::InvalidNumber)
        );
        assert_matches!(
            canonical_json(&json!({ "answer": 9_007_199_254_740_992i64 })),
            Err(CanonicalJsonError::InvalidNumber)
        );
        assert!(canonical_json(&json!({ "answer": 9_007_199_254_740_991i64 })).is_ok());
        assert!(canonical_json(&json!({ "answer": -42 })).is_ok());
    }
}

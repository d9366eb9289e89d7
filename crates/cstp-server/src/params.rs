// crates/cstp-server/src/params.rs
// ============================================================================
// Module: Parameter Helpers
// Description: Dual-convention (camelCase/snake_case) JSON-RPC param access.
// Purpose: Normalize wire naming at the boundary before validation.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Keys arrive in either camelCase or snake_case; responses always emit
//! camelCase. These helpers look up the first present alias so request
//! parsing stays uniform across handlers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

// ============================================================================
// SECTION: Lookup
// ============================================================================

/// First present value among aliases.
#[must_use]
pub fn get<'a>(params: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|key| params.get(*key))
}

/// First present string among aliases.
#[must_use]
pub fn get_str<'a>(params: &'a Value, aliases: &[&str]) -> Option<&'a str> {
    get(params, aliases).and_then(Value::as_str)
}

/// First present float among aliases.
#[must_use]
pub fn get_f64(params: &Value, aliases: &[&str]) -> Option<f64> {
    get(params, aliases).and_then(Value::as_f64)
}

/// First present unsigned integer among aliases.
#[must_use]
pub fn get_usize(params: &Value, aliases: &[&str]) -> Option<usize> {
    get(params, aliases)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
}

/// First present boolean among aliases.
#[must_use]
pub fn get_bool(params: &Value, aliases: &[&str]) -> Option<bool> {
    get(params, aliases).and_then(Value::as_bool)
}

/// First present string list among aliases.
#[must_use]
pub fn get_str_list(params: &Value, aliases: &[&str]) -> Option<Vec<String>> {
    get(params, aliases).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::get_bool;
    use super::get_str;
    use super::get_str_list;
    use super::get_usize;

    #[test]
    fn aliases_resolve_in_order() {
        let params = json!({ "decision_id": "snake", "decisionId": "camel" });
        assert_eq!(get_str(&params, &["decisionId", "decision_id"]), Some("camel"));
        assert_eq!(get_str(&params, &["decision_id", "decisionId"]), Some("snake"));
        assert_eq!(get_str(&params, &["missing"]), None);
    }

    #[test]
    fn typed_accessors_convert() {
        let params = json!({ "limit": 5, "dryRun": true, "tags": ["a", "b"] });
        assert_eq!(get_usize(&params, &["limit"]), Some(5));
        assert_eq!(get_bool(&params, &["dryRun", "dry_run"]), Some(true));
        assert_eq!(
            get_str_list(&params, &["tags"]),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }
}

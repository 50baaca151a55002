//! The snapshot query endpoint's filter grammar:
//! `<field> <op> <value>` composed with `AND`/`OR` (`AND` binds tighter,
//! left-associative, no parentheses). Defaults to `status = open` when the
//! caller omits `q`.

use serde_json::Value;

use crate::error::SnapshotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Like,
}

impl Op {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "in" => Some(Self::In),
            "like" => Some(Self::Like),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: String,
}

/// `AND`-joined conditions; the whole filter is an `OR` of these.
#[derive(Debug, Clone)]
pub struct Filter(pub Vec<Vec<Condition>>);

impl Filter {
    /// Parses the `q` query parameter, or the default `status = open` when
    /// `raw` is `None`/empty.
    ///
    /// # Errors
    ///
    /// Returns `invalid_query` for unknown operators or malformed atoms.
    pub fn parse(raw: Option<&str>) -> Result<Self, SnapshotError> {
        let raw = match raw {
            Some(s) if !s.trim().is_empty() => s,
            _ => "status = open",
        };
        let or_clauses = raw.split(" OR ").map(str::trim).filter(|s| !s.is_empty());
        let mut clauses = Vec::new();
        for or_clause in or_clauses {
            let mut conditions = Vec::new();
            for atom in or_clause.split(" AND ").map(str::trim) {
                if atom.is_empty() {
                    continue;
                }
                conditions.push(parse_atom(atom)?);
            }
            if conditions.is_empty() {
                return Err(SnapshotError::InvalidQuery(format!(
                    "empty clause in {raw:?}"
                )));
            }
            clauses.push(conditions);
        }
        if clauses.is_empty() {
            return Err(SnapshotError::InvalidQuery("empty filter".to_owned()));
        }
        Ok(Self(clauses))
    }

    /// Evaluates the filter against one decoded entity payload.
    #[must_use]
    pub fn matches(&self, payload: &Value) -> bool {
        self.0
            .iter()
            .any(|and_clause| and_clause.iter().all(|cond| cond.matches(payload)))
    }
}

fn parse_atom(atom: &str) -> Result<Condition, SnapshotError> {
    let mut parts = atom.splitn(3, ' ');
    let field = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SnapshotError::InvalidQuery(format!("malformed clause {atom:?}")))?;
    let op_token = parts
        .next()
        .ok_or_else(|| SnapshotError::InvalidQuery(format!("malformed clause {atom:?}")))?;
    let value = parts
        .next()
        .ok_or_else(|| SnapshotError::InvalidQuery(format!("malformed clause {atom:?}")))?;
    let op = Op::parse(op_token)
        .ok_or_else(|| SnapshotError::InvalidQuery(format!("unknown operator {op_token:?}")))?;
    Ok(Condition {
        field: field.to_owned(),
        op,
        value: value.trim_matches('"').to_owned(),
    })
}

impl Condition {
    fn matches(&self, payload: &Value) -> bool {
        let Some(actual) = payload.get(&self.field) else {
            return false;
        };
        match self.op {
            Op::Eq => value_eq(actual, &self.value),
            Op::Ne => !value_eq(actual, &self.value),
            Op::Lt => value_cmp(actual, &self.value).is_some_and(|o| o.is_lt()),
            Op::Le => value_cmp(actual, &self.value).is_some_and(|o| o.is_le()),
            Op::Gt => value_cmp(actual, &self.value).is_some_and(|o| o.is_gt()),
            Op::Ge => value_cmp(actual, &self.value).is_some_and(|o| o.is_ge()),
            Op::In => self.value.split(',').map(str::trim).any(|v| value_eq(actual, v)),
            Op::Like => {
                let actual_str = value_as_str(actual);
                like_match(&actual_str, &self.value)
            }
        }
    }
}

fn value_as_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_eq(actual: &Value, expected: &str) -> bool {
    value_as_str(actual) == expected
}

fn value_cmp(actual: &Value, expected: &str) -> Option<std::cmp::Ordering> {
    if let (Some(a), Ok(b)) = (actual.as_f64(), expected.parse::<f64>()) {
        return a.partial_cmp(&b);
    }
    Some(value_as_str(actual).as_str().cmp(expected))
}

/// `%` is the only wildcard, matching any run of characters.
fn like_match(haystack: &str, pattern: &str) -> bool {
    match (pattern.starts_with('%'), pattern.ends_with('%')) {
        (true, true) if pattern.len() >= 2 => haystack.contains(&pattern[1..pattern.len() - 1]),
        (true, false) => haystack.ends_with(&pattern[1..]),
        (false, true) => haystack.starts_with(&pattern[..pattern.len() - 1]),
        _ => haystack == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_status_open() {
        let filter = Filter::parse(None).unwrap();
        assert!(filter.matches(&json!({"status": "open"})));
        assert!(!filter.matches(&json!({"status": "closed"})));
    }

    #[test]
    fn and_requires_all_clauses() {
        let filter = Filter::parse(Some("status = open AND priority = high")).unwrap();
        assert!(filter.matches(&json!({"status": "open", "priority": "high"})));
        assert!(!filter.matches(&json!({"status": "open", "priority": "low"})));
    }

    #[test]
    fn or_requires_any_clause() {
        let filter = Filter::parse(Some("status = open OR status = blocked")).unwrap();
        assert!(filter.matches(&json!({"status": "blocked"})));
        assert!(!filter.matches(&json!({"status": "closed"})));
    }

    #[test]
    fn in_operator_matches_any_listed_value() {
        let filter = Filter::parse(Some("status in open,blocked")).unwrap();
        assert!(filter.matches(&json!({"status": "blocked"})));
    }

    #[test]
    fn unknown_operator_is_invalid_query() {
        assert!(Filter::parse(Some("status ~ open")).is_err());
    }

    #[test]
    fn like_supports_prefix_suffix_and_contains() {
        let filter = Filter::parse(Some("title like %bug%")).unwrap();
        assert!(filter.matches(&json!({"title": "fix the bug report"})));
    }
}

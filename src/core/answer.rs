//! 澄清回答归一化
//!
//! 前端提交的回答形态五花八门：`{label, value}` 选项对象、"yes"/"1" 字符串、JSON 编码的数组、
//! 逗号分隔的多值……按问题声明的 expected_type 统一成引擎可直接读取的值。

use serde_json::Value;

/// 归一化一次回答；空白 / "null" / "none" 归为 Value::Null（视为未回答）
pub fn normalize(raw: Value, expected: &str) -> Value {
    let expected = expected.trim().to_lowercase();
    let value = unwrap_selection(raw);

    if expected == "boolean" || expected == "bool" {
        return match value {
            Value::Bool(b) => Value::Bool(b),
            Value::Null => Value::Null,
            // 读不出是/否的回答原样保留，策略会把问题再问一次
            other => match scalar_text(&other) {
                Some(s) if is_empty_text(&s) => Value::Null,
                Some(s) => match s.trim().to_lowercase().as_str() {
                    "1" | "true" | "yes" | "y" | "ok" => Value::Bool(true),
                    "0" | "false" | "no" | "n" => Value::Bool(false),
                    _ => Value::String(s.trim().to_string()),
                },
                None => Value::Null,
            },
        };
    }

    if expected.ends_with("[]") {
        return to_list(value);
    }

    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => Value::String(format!("{}", f as i64)),
            _ => Value::String(n.to_string()),
        },
        Value::String(s) if is_empty_text(&s) => Value::Null,
        other => other,
    }
}

/// UI 组件常见的 `{label, value}` / `{name}` 选项对象取出实际值
fn unwrap_selection(raw: Value) -> Value {
    match raw {
        Value::Object(map) => ["value", "label", "name"]
            .iter()
            .find_map(|k| map.get(*k).filter(|v| !v.is_null()).cloned())
            .unwrap_or(Value::Null),
        other => other,
    }
}

fn to_list(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(unwrap_selection)
                .filter(|v| !v.is_null())
                .collect(),
        ),
        Value::Null => Value::Array(Vec::new()),
        Value::String(s) => {
            let t = s.trim();
            if is_empty_text(t) {
                return Value::Array(Vec::new());
            }
            if t.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(t) {
                    return Value::Array(items);
                }
            }
            // data: URL 内含逗号，不能按逗号拆分
            if t.starts_with("data:") {
                return Value::Array(vec![Value::String(t.to_string())]);
            }
            Value::Array(
                t.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )
        }
        other => Value::Array(vec![other]),
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_empty_text(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "" | "null" | "none")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(normalize(json!("Yes"), "boolean"), json!(true));
        assert_eq!(normalize(json!("1"), "boolean"), json!(true));
        assert_eq!(normalize(json!(1), "boolean"), json!(true));
        assert_eq!(normalize(json!("no"), "boolean"), json!(false));
        assert_eq!(normalize(json!(false), "boolean"), json!(false));
        assert_eq!(normalize(json!({"label": "Yes", "value": "yes"}), "boolean"), json!(true));
        assert_eq!(normalize(json!("none"), "boolean"), Value::Null);
        assert_eq!(normalize(json!(" maybe "), "boolean"), json!("maybe"));
        assert_eq!(normalize(json!([true]), "boolean"), Value::Null);
    }

    #[test]
    fn test_list_coercion() {
        assert_eq!(normalize(json!("a.jpg, b.jpg"), "image[]"), json!(["a.jpg", "b.jpg"]));
        assert_eq!(normalize(json!("[\"a.jpg\"]"), "image[]"), json!(["a.jpg"]));
        assert_eq!(normalize(json!(["x", {"value": "y"}]), "string[]"), json!(["x", "y"]));
        assert_eq!(normalize(json!(""), "image[]"), json!([]));
        assert_eq!(
            normalize(json!("data:image/png;base64,AAAA"), "image[]"),
            json!(["data:image/png;base64,AAAA"])
        );
    }

    #[test]
    fn test_selection_and_blank_strings() {
        assert_eq!(normalize(json!({"label": "Cafe A", "value": "cafe_a"}), "string"), json!("cafe_a"));
        assert_eq!(normalize(json!({"name": "Locker 7"}), "string"), json!("Locker 7"));
        assert_eq!(normalize(json!("  null "), "string"), Value::Null);
        assert_eq!(normalize(json!(""), "text"), Value::Null);
        assert_eq!(normalize(json!(2), "string"), json!("2"));
    }
}

//! VM 유틸리티 함수
//!
//! Value 표시, 타입 이름, 동등성 비교 등 VM에서 공통적으로 사용되는 헬퍼 함수들을 제공합니다.

use super::bytecode::Value;
use super::machine::{VmErrorKind, VmResult, err};

/// `Print`가 출력하는 텍스트 형태
///
/// ```ignore
/// display_value(&Value::Int(42))      // → "42"
/// display_value(&Value::Float(1.0))   // → "1"
/// display_value(&Value::Char(b'a'))   // → "a"
/// display_value(&Value::Null)         // → "null"
/// ```
pub fn display_value(v: &Value) -> String {
    match v {
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Bool(b) => b.to_string(),
        Value::Char(c) => (*c as char).to_string(),
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Object(r) => format!("<object #{}>", r.index()),
    }
}

/// 최단 round-trip 표기. 지수가 -4 미만이거나 6 이상이면 `1e+06` 형태를 씁니다.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    let sci = format!("{:e}", f);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return f.to_string();
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..6).contains(&exp) {
        return f.to_string();
    }
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exp.abs())
}

/// Value의 타입 이름
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Bool(_) => "bool",
        Value::String(_) => "string",
        Value::Char(_) => "char",
        Value::Null => "null",
        Value::Object(_) => "object",
    }
}

/// Value 동등성 비교
///
/// # Rules
///
/// - 같은 태그끼리만 비교, 태그가 다르면 `false` (int/float 변환 없음)
/// - `Null`은 `Null`하고만 같음
/// - 객체: 참조 비교 (identity)
pub fn eq_vals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Object(x), Value::Object(y)) => x == y,
        _ => false,
    }
}

// ========== 타입 추출 헬퍼 함수들 (expect_*) ==========

/// Value에서 int 추출
pub fn expect_int(v: &Value, what: &'static str) -> VmResult<i64> {
    match v {
        Value::Int(n) => Ok(*n),
        _ => Err(err(
            VmErrorKind::TypeError(what),
            format!("{}: expected int, got {}", what, type_name(v)),
        )),
    }
}

/// Value에서 bool 추출. 불리언이 아니면 컴파일러/최적화기 버그입니다.
pub fn expect_bool(v: &Value, what: &'static str) -> VmResult<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        _ => Err(err(
            VmErrorKind::NonBoolean,
            format!("{}: expected bool, got {}", what, type_name(v)),
        )),
    }
}

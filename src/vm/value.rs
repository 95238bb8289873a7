//! 런타임 값과 힙 객체
//!
//! `Value`는 고정된 태그 집합을 가진 값 타입이고, `Object`는 힙이 소유하는 엔티티입니다.
//! `Value::Object`는 힙 슬롯 참조(`ObjRef`)일 뿐 객체를 소유하지 않습니다.

use serde::{Deserialize, Serialize};

/// 힙 슬롯을 가리키는 비소유 참조
///
/// 슬롯이 해제될 때마다 세대가 올라가므로, 수집 이후에 남은 옛 참조는
/// 같은 슬롯을 재사용한 새 객체를 가리키지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjRef {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    /// 단일 바이트 문자
    Char(u8),
    Null,
    Object(ObjRef),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Array,
}

/// 힙에 할당된 객체
///
/// `marked`는 수집기 전용 비트로, 수집 사이에는 항상 `false`입니다.
#[derive(Debug, Clone)]
pub struct Object {
    pub kind: ObjectKind,
    pub marked: bool,
    pub items: Vec<Value>,
}

impl Object {
    pub fn new(kind: ObjectKind, items: Vec<Value>) -> Self {
        Self {
            kind,
            marked: false,
            items,
        }
    }

    /// null로 채운 길이 `len` 배열. 메모리를 확보할 수 없으면 `None`
    pub fn try_array(len: usize) -> Option<Self> {
        let mut items = Vec::new();
        items.try_reserve_exact(len).ok()?;
        items.resize(len, Value::Null);
        Some(Self::new(ObjectKind::Array, items))
    }

    /// 이 객체가 직접 참조하는 다른 객체들
    pub fn children(&self) -> impl Iterator<Item = ObjRef> + '_ {
        let items: &[Value] = match self.kind {
            ObjectKind::Array => &self.items,
        };
        items.iter().filter_map(Value::as_object)
    }
}

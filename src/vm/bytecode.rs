use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, FromRepr, IntoStaticStr};
use thiserror::Error;

pub use super::value::Value;

/// 명령어 opcode
///
/// 인코딩: opcode 1바이트 + 피연산자 (big-endian).
/// - `Const`, `Jump`, `JumpIfFalse`, `Call`: u16 피연산자
/// - `LoadLocal`, `StoreLocal`: u8 슬롯 번호
/// - 나머지: 피연산자 없음
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum OpCode {
    Const = 0,
    LoadLocal,
    StoreLocal,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    Neg,
    Not,

    /// 절대 바이트 오프셋으로 점프
    Jump,
    /// 스택 top(bool)을 peek하고 false면 점프. pop하지 않음
    JumpIfFalse,
    Pop,

    /// 상수 풀의 함수 이름(string)으로 호출
    Call,
    Return,

    ArrayNew,
    ArrayGet,
    ArraySet,

    /// 최적화 패스만 생성하는 융합 명령어
    /// Stack: array, index →
    ArraySwapJit,

    Print,
}

impl OpCode {
    /// 피연산자 바이트 수
    pub fn operand_width(self) -> usize {
        match self {
            OpCode::Const | OpCode::Jump | OpCode::JumpIfFalse | OpCode::Call => 2,
            OpCode::LoadLocal | OpCode::StoreLocal => 1,
            _ => 0,
        }
    }

    /// opcode 바이트를 포함한 전체 명령어 크기
    pub fn size(self) -> usize {
        1 + self.operand_width()
    }
}

/// 선언 타입 태그 (프런트엔드가 기록한 param/return 타입)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum TypeKind {
    Invalid,
    Int,
    Float,
    Bool,
    String,
    Char,
    Void,
    Null,
    Array,
}

/// 명령어 바이트열 + 상수 풀
///
/// 코드는 append-only이며 `patch_u16`만 예외입니다. 이 계층은 범위 검사를 하지 않으므로
/// 오프셋의 유효성은 호출자(컴파일러)가 보장해야 합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_op(&mut self, op: OpCode) {
        self.code.push(op as u8);
    }

    pub fn write_byte(&mut self, b: u8) {
        self.code.push(b);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    /// 이미 기록된 u16 피연산자를 덮어씀 (forward jump 해결용)
    pub fn patch_u16(&mut self, offset: usize, v: u16) {
        let [hi, lo] = v.to_be_bytes();
        self.code[offset] = hi;
        self.code[offset + 1] = lo;
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// 상수를 추가하고 인덱스를 반환
    pub fn add_constant(&mut self, v: Value) -> usize {
        self.constants.push(v);
        self.constants.len() - 1
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub param_count: usize,
    pub param_types: Vec<TypeKind>,
    pub return_type: TypeKind,
    pub chunk: Chunk,
    pub num_locals: usize,
}

impl FunctionInfo {
    pub fn new(name: impl Into<String>, param_count: usize) -> Self {
        Self {
            name: name.into(),
            param_count,
            param_types: Vec::with_capacity(param_count),
            return_type: TypeKind::Void,
            chunk: Chunk::new(),
            num_locals: 0,
        }
    }

    pub fn add_parameter(&mut self, ty: TypeKind) {
        self.param_types.push(ty);
    }

    pub fn set_return_type(&mut self, ty: TypeKind) {
        self.return_type = ty;
    }

    pub fn reserve_locals(&mut self, count: usize) {
        self.num_locals = count;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate function: {0}")]
pub struct DuplicateFunction(pub String);

/// 함수 이름 → 함수 정보
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: HashMap<String, FunctionInfo>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    pub fn add_function(&mut self, func: FunctionInfo) -> Result<(), DuplicateFunction> {
        if self.functions.contains_key(&func.name) {
            return Err(DuplicateFunction(func.name));
        }
        self.functions.insert(func.name.clone(), func);
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut FunctionInfo> {
        self.functions.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// 이름순으로 정렬된 함수 목록 (출력 순서 고정용)
    pub fn sorted_functions(&self) -> Vec<&FunctionInfo> {
        let mut funcs: Vec<&FunctionInfo> = self.functions.values().collect();
        funcs.sort_by(|a, b| a.name.cmp(&b.name));
        funcs
    }
}

//! 인접 원소 비교-교환 패턴 인식
//!
//! ```text
//! if a[j] > a[j+1] { let t = a[j]; a[j] = a[j+1]; a[j+1] = t; }
//! ```
//!
//! 컴파일러가 위 코드에 대해 내는 명령어열:
//!
//! ```text
//! LoadLocal a; LoadLocal j; ArrayGet
//! LoadLocal a; LoadLocal j; Const 1; Add; ArrayGet
//! Gt
//! JumpIfFalse skip; Pop
//! LoadLocal a; LoadLocal j; ArrayGet; StoreLocal t
//! LoadLocal a; LoadLocal j; LoadLocal a; LoadLocal j; Const 1; Add; ArrayGet; ArraySet
//! LoadLocal a; LoadLocal j; Const 1; Add; LoadLocal t; ArraySet
//! Jump end
//! skip: Pop
//! end:
//! ```
//!
//! `[start, end)` 전체가 `LoadLocal a; LoadLocal j; ArraySwapJit`로 바뀝니다.

use super::decode::CodeReader;
use crate::vm::bytecode::{Chunk, OpCode, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapMatch {
    pub start: usize,
    pub end: usize,
    pub array_slot: u8,
    pub index_slot: u8,
}

impl SwapMatch {
    /// 대체 코드 (5바이트)
    pub fn replacement(&self) -> Vec<u8> {
        vec![
            OpCode::LoadLocal as u8,
            self.array_slot,
            OpCode::LoadLocal as u8,
            self.index_slot,
            OpCode::ArraySwapJit as u8,
        ]
    }
}

/// `start`에서 시작하는 교환 패턴을 찾음
pub fn detect_swap(chunk: &Chunk, start: usize) -> Option<SwapMatch> {
    let mut r = CodeReader::new(&chunk.code, start);

    // a[j]
    let arr = r.expect_arg(OpCode::LoadLocal)?;
    let j = r.expect_arg(OpCode::LoadLocal)?;
    r.expect(OpCode::ArrayGet)?;

    // a[j+1]
    r.expect_slot(OpCode::LoadLocal, arr)?;
    r.expect_slot(OpCode::LoadLocal, j)?;
    plus_one(&mut r, chunk)?;
    r.expect(OpCode::ArrayGet)?;

    r.expect(OpCode::Gt)?;
    let skip = r.expect_arg(OpCode::JumpIfFalse)? as usize;
    r.expect(OpCode::Pop)?;

    // t = a[j]
    r.expect_slot(OpCode::LoadLocal, arr)?;
    r.expect_slot(OpCode::LoadLocal, j)?;
    r.expect(OpCode::ArrayGet)?;
    let tmp = r.expect_arg(OpCode::StoreLocal)?;

    // a[j] = a[j+1]
    r.expect_slot(OpCode::LoadLocal, arr)?;
    r.expect_slot(OpCode::LoadLocal, j)?;
    r.expect_slot(OpCode::LoadLocal, arr)?;
    r.expect_slot(OpCode::LoadLocal, j)?;
    plus_one(&mut r, chunk)?;
    r.expect(OpCode::ArrayGet)?;
    r.expect(OpCode::ArraySet)?;

    // a[j+1] = t
    r.expect_slot(OpCode::LoadLocal, arr)?;
    r.expect_slot(OpCode::LoadLocal, j)?;
    plus_one(&mut r, chunk)?;
    r.expect_slot(OpCode::LoadLocal, tmp)?;
    r.expect(OpCode::ArraySet)?;

    let end = r.expect_arg(OpCode::Jump)? as usize;

    // skip은 바로 다음 Pop이고 end는 그 Pop 직후여야 함
    if skip != r.pos() || r.expect(OpCode::Pop).is_none() || end != skip + 1 {
        return None;
    }

    Some(SwapMatch {
        start,
        end,
        array_slot: u8::try_from(arr).ok()?,
        index_slot: u8::try_from(j).ok()?,
    })
}

/// `Const 1; Add`
fn plus_one(r: &mut CodeReader<'_>, chunk: &Chunk) -> Option<()> {
    let k = r.expect_arg(OpCode::Const)?;
    match chunk.constants.get(k as usize)? {
        Value::Int(1) => r.expect(OpCode::Add),
        _ => None,
    }
}

use super::decode::decode;
use crate::vm::bytecode::OpCode;
use std::collections::HashMap;

/// `[start, end)`를 `code`로 바꾸는 패치. 패치들은 오름차순이고 겹치지 않아야 합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePatch {
    pub start: usize,
    pub end: usize,
    pub code: Vec<u8>,
}

/// 패치를 적용한 새 코드를 만든다
///
/// 모든 점프 대상을 새 오프셋으로 옮깁니다. 대상이 패치 내부를 가리키거나
/// 명령어가 잘려 있으면 `None`을 반환하고, 호출자는 원래 코드를 유지해야 합니다.
pub fn rewrite(original: &[u8], patches: &[CodePatch]) -> Option<Vec<u8>> {
    let map = address_map(original, patches)?;
    rebuild(original, patches, &map)
}

/// 옛 명령어 시작 오프셋 → 새 오프셋
fn address_map(original: &[u8], patches: &[CodePatch]) -> Option<HashMap<usize, usize>> {
    let mut map = HashMap::with_capacity(original.len() / 2);
    let mut patches = patches.iter().peekable();
    let mut old = 0;
    let mut new = 0;

    while old < original.len() {
        if let Some(p) = patches.next_if(|p| p.start == old) {
            map.insert(old, new);
            new += p.code.len();
            old = p.end;
            continue;
        }
        let ins = decode(original, old)?;
        map.insert(old, new);
        old += ins.size;
        new += ins.size;
    }
    // 코드 끝을 가리키는 점프
    map.insert(original.len(), new);
    Some(map)
}

fn rebuild(original: &[u8], patches: &[CodePatch], map: &HashMap<usize, usize>) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(original.len());
    let mut patches = patches.iter().peekable();
    let mut ip = 0;

    while ip < original.len() {
        if let Some(p) = patches.next_if(|p| p.start == ip) {
            out.extend_from_slice(&p.code);
            ip = p.end;
            continue;
        }

        let ins = decode(original, ip)?;
        match ins.op {
            OpCode::Jump | OpCode::JumpIfFalse => {
                let target = *map.get(&(ins.arg as usize))?;
                out.push(ins.op as u8);
                out.extend_from_slice(&u16::try_from(target).ok()?.to_be_bytes());
            }
            _ => out.extend_from_slice(&original[ip..ip + ins.size]),
        }
        ip += ins.size;
    }
    Some(out)
}

// peephole 최적화 모듈
//
// 완성된 함수의 명령어열을 한 번 훑으며 인접 원소 비교-교환 패턴을
// ArraySwapJit 한 개로 융합합니다. 재작성에 실패하면 원래 코드를 그대로 둡니다.

use crate::vm::bytecode::{FunctionInfo, Module};
use tracing::debug;

mod decode;
mod pattern;
mod rewrite;

pub use decode::{CodeReader, Instruction, decode};
pub use pattern::{SwapMatch, detect_swap};
pub use rewrite::{CodePatch, rewrite};

/// 함수 하나를 최적화하고 융합한 패턴 수를 반환
pub fn optimize_function(func: &mut FunctionInfo) -> usize {
    let chunk = &func.chunk;
    let mut patches = Vec::new();
    let mut ip = 0;

    while ip < chunk.code.len() {
        let Some(ins) = decode(&chunk.code, ip) else {
            break;
        };
        if let Some(m) = detect_swap(chunk, ip) {
            patches.push(CodePatch {
                start: m.start,
                end: m.end,
                code: m.replacement(),
            });
            ip = m.end;
            continue;
        }
        ip += ins.size;
    }

    if patches.is_empty() {
        return 0;
    }

    let old_size = chunk.code.len();
    match rewrite(&chunk.code, &patches) {
        Some(code) => {
            debug!(
                function = %func.name,
                patches = patches.len(),
                old_size,
                new_size = code.len(),
                "peephole rewrite"
            );
            func.chunk.code = code;
            patches.len()
        }
        None => {
            debug!(function = %func.name, patches = patches.len(), "peephole rewrite aborted");
            0
        }
    }
}

/// 모듈의 모든 함수를 최적화
pub fn optimize_module(module: &mut Module) -> usize {
    module.functions.values_mut().map(optimize_function).sum()
}

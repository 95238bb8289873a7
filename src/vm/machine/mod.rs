// machine 모듈 - VM 실행 엔진
//
// 함수 호출 하나당 인터프리터 루프 하나가 돌고, 중첩 호출은 호스트 재귀로 처리합니다.
// 실행 중인 프레임의 locals/stack은 수집기의 루트입니다.

use crate::config::VmConfig;
use crate::runtime_io::{RuntimeIo, StdIo};
use crate::vm::bytecode::{FunctionInfo, Module, OpCode, Value};
use crate::vm::heap::{CollectStats, Heap};
use crate::vm::value::{Object, ObjectKind};
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tracing::trace;

// 서브모듈
mod instruction;

#[cfg(test)]
mod tests;

// ========== 타입 정의 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmErrorKind {
    UnknownFunction,
    ArityMismatch { expected: usize, got: usize },
    /// 연산자 이름
    TypeError(&'static str),
    ZeroDivision,
    IndexOutOfRange,
    NegativeLength,
    /// 배열 길이만큼 메모리를 확보하지 못함
    AllocationFailed,
    BadConstant,
    BadLocal,
    BadJump,
    TruncatedInstruction,
    UnknownOpcode(u8),
    CallDepthExceeded,
    StackUnderflow,
    NonBoolean,
}

impl VmErrorKind {
    /// 올바른 프로그램에서는 일어날 수 없는 오류 (컴파일러/최적화기 버그)
    pub fn is_invariant(&self) -> bool {
        matches!(self, VmErrorKind::StackUnderflow | VmErrorKind::NonBoolean)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
}

pub type VmResult<T> = Result<T, VmError>;

/// 호출 하나의 실행 상태. 수집기는 모든 프레임의 locals와 stack을 루트로 봅니다.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub locals: Vec<Value>,
    pub stack: Vec<Value>,
}

impl Frame {
    fn new(locals: Vec<Value>) -> Self {
        Self {
            locals,
            stack: Vec::with_capacity(256),
        }
    }
}

pub struct Vm<'m, IO: RuntimeIo = StdIo> {
    module: &'m Module,
    heap: Heap,
    /// 현재 실행 중인 프레임
    frame: Frame,
    /// 호출자 프레임들 (바닥부터)
    frames: Vec<Frame>,
    config: VmConfig,
    io: IO,
}

// ========== 유틸리티 함수 ==========

/// VmError 생성 헬퍼 함수
pub fn err(kind: VmErrorKind, message: String) -> VmError {
    VmError { kind, message }
}

// ========== VM 구현 ==========

impl<'m> Vm<'m, StdIo> {
    pub fn new(module: &'m Module) -> Self {
        Self::with_io(module, VmConfig::default(), StdIo)
    }

    pub fn with_config(module: &'m Module, config: VmConfig) -> Self {
        Self::with_io(module, config, StdIo)
    }
}

impl<'m, IO: RuntimeIo> Vm<'m, IO> {
    pub fn with_io(module: &'m Module, config: VmConfig, io: IO) -> Self {
        Self {
            module,
            heap: Heap::new(config.initial_gc_threshold, config.gc_headroom),
            frame: Frame::default(),
            frames: Vec::new(),
            config,
            io,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn into_io(self) -> IO {
        self.io
    }

    /// 이름으로 함수를 호출
    ///
    /// 반환값이 배열이면 그 참조는 루트가 아닙니다. 다음 수집 이후에는
    /// `array_items`가 `None`을 돌려주며, 재사용된 슬롯의 새 객체를 가리키지 않습니다.
    pub fn invoke(&mut self, name: &str, args: Vec<Value>) -> VmResult<Value> {
        let module = self.module;
        let func = module.function(name).ok_or_else(|| {
            err(
                VmErrorKind::UnknownFunction,
                format!("unknown function {:?}", name),
            )
        })?;
        if args.len() != func.param_count {
            return Err(err(
                VmErrorKind::ArityMismatch {
                    expected: func.param_count,
                    got: args.len(),
                },
                format!(
                    "function {:?}: expected {} args, got {}",
                    name,
                    func.param_count,
                    args.len()
                ),
            ));
        }
        self.run_function(func, args)
    }

    /// 호스트 쪽에서 배열을 만든다 (인자로 넘기기 위함)
    ///
    /// 수집을 일으키지 않습니다. 호스트가 들고 있는 참조는 루트가 아니므로
    /// 다음 호출의 인자로 넘기기 전까지만 유효합니다. 수집된 뒤의 참조는 무효로 판별됩니다.
    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.heap.insert(Object::new(ObjectKind::Array, items)))
    }

    /// 배열 값의 원소들
    pub fn array_items(&self, v: &Value) -> Option<&[Value]> {
        let obj = self.heap.get(v.as_object()?)?;
        match obj.kind {
            ObjectKind::Array => Some(&obj.items),
        }
    }

    /// 현재 루트 스택으로 즉시 수집
    pub fn collect_garbage(&mut self) -> CollectStats {
        let roots = self
            .frames
            .iter()
            .chain(std::iter::once(&self.frame))
            .flat_map(|f| f.locals.iter().chain(f.stack.iter()));
        self.heap.collect(roots)
    }

    // ========== 프레임 관리 ==========

    fn run_function(&mut self, func: &'m FunctionInfo, args: Vec<Value>) -> VmResult<Value> {
        if self
            .config
            .max_call_depth
            .is_some_and(|max| self.frames.len() >= max)
        {
            return Err(err(
                VmErrorKind::CallDepthExceeded,
                format!("call {:?}: call depth limit exceeded", func.name),
            ));
        }
        trace!(function = %func.name, depth = self.frames.len(), "call");

        let mut locals = args;
        let size = func.num_locals.max(locals.len());
        locals.resize(size, Value::Null);

        let mut guard = FrameGuard::enter(self, Frame::new(locals));
        guard.execute(func)
    }

    fn execute(&mut self, func: &'m FunctionInfo) -> VmResult<Value> {
        use instruction::ExecutionFlow;

        let code = &func.chunk.code;
        let mut ip = 0;
        while ip < code.len() {
            let byte = code[ip];
            let op = OpCode::from_repr(byte).ok_or_else(|| {
                err(
                    VmErrorKind::UnknownOpcode(byte),
                    format!("unknown opcode {} at {}", byte, ip),
                )
            })?;
            let next = ip + op.size();
            if next > code.len() {
                return Err(err(
                    VmErrorKind::TruncatedInstruction,
                    format!("{}: truncated instruction at {}", op, ip),
                ));
            }
            let arg = match op.operand_width() {
                0 => 0,
                1 => code[ip + 1] as usize,
                _ => u16::from_be_bytes([code[ip + 1], code[ip + 2]]) as usize,
            };
            ip = next;

            match self.execute_instruction(op, arg, func)? {
                ExecutionFlow::Continue => {}
                ExecutionFlow::Jump(target) => {
                    if target > code.len() {
                        return Err(err(
                            VmErrorKind::BadJump,
                            format!("{}: target {} out of range", op, target),
                        ));
                    }
                    ip = target;
                }
                ExecutionFlow::Return(v) => return Ok(v),
            }
        }
        // 컴파일러가 항상 Return을 넣으므로 여기는 방어용
        Ok(Value::Null)
    }

    // ========== 스택 연산 ==========

    fn push(&mut self, v: Value) {
        self.frame.stack.push(v);
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.frame
            .stack
            .pop()
            .ok_or_else(|| err(VmErrorKind::StackUnderflow, "stack underflow".into()))
    }

    fn get_local(&self, ix: usize) -> VmResult<Value> {
        self.frame.locals.get(ix).cloned().ok_or_else(|| {
            err(
                VmErrorKind::BadLocal,
                format!("invalid local index {}", ix),
            )
        })
    }

    fn set_local(&mut self, ix: usize, v: Value) -> VmResult<()> {
        let slot = self.frame.locals.get_mut(ix).ok_or_else(|| {
            err(
                VmErrorKind::BadLocal,
                format!("invalid local index {}", ix),
            )
        })?;
        *slot = v;
        Ok(())
    }
}

/// 프레임을 루트 스택에 올려두는 가드
///
/// drop될 때 (정상 반환이든 오류 전파든) 호출자 프레임을 복원합니다.
struct FrameGuard<'a, 'm, IO: RuntimeIo> {
    vm: &'a mut Vm<'m, IO>,
}

impl<'a, 'm, IO: RuntimeIo> FrameGuard<'a, 'm, IO> {
    fn enter(vm: &'a mut Vm<'m, IO>, frame: Frame) -> Self {
        let caller = std::mem::replace(&mut vm.frame, frame);
        vm.frames.push(caller);
        Self { vm }
    }
}

impl<'m, IO: RuntimeIo> Deref for FrameGuard<'_, 'm, IO> {
    type Target = Vm<'m, IO>;

    fn deref(&self) -> &Self::Target {
        self.vm
    }
}

impl<'m, IO: RuntimeIo> DerefMut for FrameGuard<'_, 'm, IO> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.vm
    }
}

impl<IO: RuntimeIo> Drop for FrameGuard<'_, '_, IO> {
    fn drop(&mut self) {
        if let Some(caller) = self.vm.frames.pop() {
            self.vm.frame = caller;
        }
    }
}

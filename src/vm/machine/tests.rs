//! VM 테스트 모듈
//!
//! 컴파일러 없이 바이트코드를 직접 조립해서 실행합니다.

use super::*;
use crate::runtime_io::BufferIo;
use crate::vm::bytecode::{Chunk, FunctionInfo, Module, OpCode, Value};

/// 테스트용 미니 어셈블러
#[derive(Default)]
struct Asm {
    chunk: Chunk,
}

impl Asm {
    fn op(mut self, op: OpCode) -> Self {
        self.chunk.write_op(op);
        self
    }

    fn konst(mut self, v: Value) -> Self {
        let idx = self.chunk.add_constant(v) as u16;
        self.chunk.write_op(OpCode::Const);
        self.chunk.write_u16(idx);
        self
    }

    fn local(mut self, op: OpCode, slot: u8) -> Self {
        self.chunk.write_op(op);
        self.chunk.write_byte(slot);
        self
    }

    fn jump(mut self, op: OpCode, target: u16) -> Self {
        self.chunk.write_op(op);
        self.chunk.write_u16(target);
        self
    }

    fn call(mut self, name: &str) -> Self {
        let idx = self.chunk.add_constant(Value::String(name.into())) as u16;
        self.chunk.write_op(OpCode::Call);
        self.chunk.write_u16(idx);
        self
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.chunk.code.extend_from_slice(bytes);
        self
    }

    fn function(self, name: &str, params: usize, locals: usize) -> FunctionInfo {
        let mut f = FunctionInfo::new(name, params);
        f.chunk = self.chunk;
        f.reserve_locals(locals);
        f
    }
}

fn module_of(funcs: Vec<FunctionInfo>) -> Module {
    let mut module = Module::new("test");
    for f in funcs {
        module.add_function(f).unwrap();
    }
    module
}

fn run_main(module: &Module) -> VmResult<Value> {
    let mut vm = Vm::with_io(module, VmConfig::default(), BufferIo::new());
    vm.invoke("main", vec![])
}

fn kind_of(result: VmResult<Value>) -> VmErrorKind {
    result.unwrap_err().kind
}

// ========== 기본 실행 ==========

#[test]
fn test_const_add_return() {
    let main = Asm::default()
        .konst(Value::Int(40))
        .konst(Value::Int(2))
        .op(OpCode::Add)
        .op(OpCode::Return)
        .function("main", 0, 0);
    assert_eq!(run_main(&module_of(vec![main])).unwrap(), Value::Int(42));
}

#[test]
fn test_return_on_empty_stack_is_null() {
    let main = Asm::default().op(OpCode::Return).function("main", 0, 0);
    assert_eq!(run_main(&module_of(vec![main])).unwrap(), Value::Null);
}

#[test]
fn test_falling_off_the_end_is_null() {
    let main = Asm::default()
        .konst(Value::Int(1))
        .op(OpCode::Pop)
        .function("main", 0, 0);
    assert_eq!(run_main(&module_of(vec![main])).unwrap(), Value::Null);
}

#[test]
fn test_locals_start_null_and_store_pops() {
    let main = Asm::default()
        .konst(Value::Int(5))
        .local(OpCode::StoreLocal, 1)
        .local(OpCode::LoadLocal, 0)
        .op(OpCode::Return)
        .function("main", 0, 2);
    assert_eq!(run_main(&module_of(vec![main])).unwrap(), Value::Null);
}

#[test]
fn test_jump_if_false_peeks() {
    // 0: Const false, 3: JumpIfFalse 10, 6: Const 1, 9: Return, 10: Return
    let main = Asm::default()
        .konst(Value::Bool(false))
        .jump(OpCode::JumpIfFalse, 10)
        .konst(Value::Int(1))
        .op(OpCode::Return)
        .op(OpCode::Return)
        .function("main", 0, 0);
    // 조건값이 스택에 남아 있으므로 그것이 반환됨
    assert_eq!(run_main(&module_of(vec![main])).unwrap(), Value::Bool(false));
}

#[test]
fn test_eq_and_not() {
    let main = Asm::default()
        .konst(Value::Null)
        .konst(Value::Int(0))
        .op(OpCode::Eq)
        .op(OpCode::Not)
        .op(OpCode::Return)
        .function("main", 0, 0);
    assert_eq!(run_main(&module_of(vec![main])).unwrap(), Value::Bool(true));
}

#[test]
fn test_print_writes_through_io() {
    let main = Asm::default()
        .konst(Value::Int(1))
        .op(OpCode::Print)
        .konst(Value::Float(2.5))
        .op(OpCode::Print)
        .konst(Value::String("hi".into()))
        .op(OpCode::Print)
        .konst(Value::Char(b'c'))
        .op(OpCode::Print)
        .konst(Value::Null)
        .op(OpCode::Print)
        .op(OpCode::Return)
        .function("main", 0, 0);
    let module = module_of(vec![main]);
    let mut vm = Vm::with_io(&module, VmConfig::default(), BufferIo::new());
    vm.invoke("main", vec![]).unwrap();
    assert_eq!(vm.io_mut().drain_output(), "1 2.5 hi c null ");

    // 비운 뒤에는 두 번째 호출의 출력만 남음
    vm.invoke("main", vec![]).unwrap();
    assert_eq!(vm.into_io().take_output(), "1 2.5 hi c null ");
}

// ========== 호출 ==========

#[test]
fn test_call_passes_args_left_to_right() {
    let sub = Asm::default()
        .local(OpCode::LoadLocal, 0)
        .local(OpCode::LoadLocal, 1)
        .op(OpCode::Sub)
        .op(OpCode::Return)
        .function("sub", 2, 2);
    let main = Asm::default()
        .konst(Value::Int(10))
        .konst(Value::Int(3))
        .call("sub")
        .op(OpCode::Return)
        .function("main", 0, 0);
    assert_eq!(run_main(&module_of(vec![sub, main])).unwrap(), Value::Int(7));
}

#[test]
fn test_invoke_checks_name_and_arity() {
    let f = Asm::default().op(OpCode::Return).function("f", 1, 1);
    let module = module_of(vec![f]);
    let mut vm = Vm::with_io(&module, VmConfig::default(), BufferIo::new());

    let e = vm.invoke("g", vec![]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::UnknownFunction);

    let e = vm.invoke("f", vec![]).unwrap_err();
    assert_eq!(
        e.kind,
        VmErrorKind::ArityMismatch {
            expected: 1,
            got: 0
        }
    );
    assert_eq!(vm.invoke("f", vec![Value::Int(1)]).unwrap(), Value::Null);
}

#[test]
fn test_call_depth_limit() {
    let f = Asm::default()
        .call("f")
        .op(OpCode::Return)
        .function("f", 0, 0);
    let module = module_of(vec![f]);
    let config = VmConfig::default().with_max_call_depth(16);
    let mut vm = Vm::with_io(&module, config, BufferIo::new());
    let e = vm.invoke("f", vec![]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::CallDepthExceeded);
}

#[test]
fn test_frames_are_restored_after_error() {
    let bad = Asm::default()
        .konst(Value::Int(1))
        .konst(Value::Int(0))
        .op(OpCode::Div)
        .function("bad", 0, 0);
    let main = Asm::default()
        .konst(Value::Int(9))
        .call("bad")
        .op(OpCode::Return)
        .function("main", 0, 0);
    let module = module_of(vec![bad, main]);
    let mut vm = Vm::with_io(&module, VmConfig::default(), BufferIo::new());

    let e = vm.invoke("main", vec![]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::ZeroDivision);
    assert!(vm.frames.is_empty());
    assert!(vm.frame.stack.is_empty());
    assert!(vm.frame.locals.is_empty());
}

// ========== 실행 오류 ==========

#[test]
fn test_decode_errors() {
    let bad_const = Asm::default().raw(&[OpCode::Const as u8, 0, 5]);
    assert_eq!(
        kind_of(run_main(&module_of(vec![bad_const.function("main", 0, 0)]))),
        VmErrorKind::BadConstant
    );

    let bad_local = Asm::default().local(OpCode::LoadLocal, 3);
    assert_eq!(
        kind_of(run_main(&module_of(vec![bad_local.function("main", 0, 1)]))),
        VmErrorKind::BadLocal
    );

    let truncated = Asm::default().raw(&[OpCode::Jump as u8, 0]);
    assert_eq!(
        kind_of(run_main(&module_of(vec![truncated.function("main", 0, 0)]))),
        VmErrorKind::TruncatedInstruction
    );

    let unknown = Asm::default().raw(&[200]);
    assert_eq!(
        kind_of(run_main(&module_of(vec![unknown.function("main", 0, 0)]))),
        VmErrorKind::UnknownOpcode(200)
    );

    let bad_jump = Asm::default().jump(OpCode::Jump, 100);
    assert_eq!(
        kind_of(run_main(&module_of(vec![bad_jump.function("main", 0, 0)]))),
        VmErrorKind::BadJump
    );
}

#[test]
fn test_invariant_faults() {
    let underflow = Asm::default().op(OpCode::Pop).function("main", 0, 0);
    let kind = kind_of(run_main(&module_of(vec![underflow])));
    assert_eq!(kind, VmErrorKind::StackUnderflow);
    assert!(kind.is_invariant());

    let not_int = Asm::default()
        .konst(Value::Int(1))
        .op(OpCode::Not)
        .function("main", 0, 0);
    let kind = kind_of(run_main(&module_of(vec![not_int])));
    assert_eq!(kind, VmErrorKind::NonBoolean);
    assert!(kind.is_invariant());

    let cond_int = Asm::default()
        .konst(Value::Int(1))
        .jump(OpCode::JumpIfFalse, 0)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![cond_int]))),
        VmErrorKind::NonBoolean
    );
}

#[test]
fn test_type_errors_are_not_invariant() {
    let mixed = Asm::default()
        .konst(Value::Int(1))
        .konst(Value::Float(1.0))
        .op(OpCode::Add)
        .function("main", 0, 0);
    let kind = kind_of(run_main(&module_of(vec![mixed])));
    assert_eq!(kind, VmErrorKind::TypeError("Add"));
    assert!(!kind.is_invariant());

    let cmp_bools = Asm::default()
        .konst(Value::Bool(true))
        .konst(Value::Bool(false))
        .op(OpCode::Lt)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![cmp_bools]))),
        VmErrorKind::TypeError("Lt")
    );

    let neg_str = Asm::default()
        .konst(Value::String("x".into()))
        .op(OpCode::Neg)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![neg_str]))),
        VmErrorKind::TypeError("Neg")
    );
}

// ========== 배열 / GC ==========

#[test]
fn test_array_new_get_set() {
    let main = Asm::default()
        .konst(Value::Int(2))
        .op(OpCode::ArrayNew)
        .local(OpCode::StoreLocal, 0)
        .local(OpCode::LoadLocal, 0)
        .konst(Value::Int(1))
        .konst(Value::Int(99))
        .op(OpCode::ArraySet)
        .local(OpCode::LoadLocal, 0)
        .konst(Value::Int(1))
        .op(OpCode::ArrayGet)
        .op(OpCode::Return)
        .function("main", 0, 1);
    assert_eq!(run_main(&module_of(vec![main])).unwrap(), Value::Int(99));
}

#[test]
fn test_array_errors() {
    let negative = Asm::default()
        .konst(Value::Int(-1))
        .op(OpCode::ArrayNew)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![negative]))),
        VmErrorKind::NegativeLength
    );

    let out_of_range = Asm::default()
        .konst(Value::Int(2))
        .op(OpCode::ArrayNew)
        .konst(Value::Int(2))
        .op(OpCode::ArrayGet)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![out_of_range]))),
        VmErrorKind::IndexOutOfRange
    );

    let not_array = Asm::default()
        .konst(Value::Int(2))
        .konst(Value::Int(0))
        .op(OpCode::ArrayGet)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![not_array]))),
        VmErrorKind::TypeError("array get")
    );

    let too_large = Asm::default()
        .konst(Value::Int(i64::MAX))
        .op(OpCode::ArrayNew)
        .op(OpCode::Return)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![too_large]))),
        VmErrorKind::AllocationFailed
    );
}

#[test]
fn test_array_set_errors() {
    let set_at = |index: i64| {
        Asm::default()
            .konst(Value::Int(2))
            .op(OpCode::ArrayNew)
            .konst(Value::Int(index))
            .konst(Value::Int(7))
            .op(OpCode::ArraySet)
            .op(OpCode::Return)
            .function("main", 0, 0)
    };
    for index in [2, -1] {
        assert_eq!(
            kind_of(run_main(&module_of(vec![set_at(index)]))),
            VmErrorKind::IndexOutOfRange
        );
    }
    assert_eq!(run_main(&module_of(vec![set_at(1)])).unwrap(), Value::Null);

    let not_array = Asm::default()
        .konst(Value::Int(2))
        .konst(Value::Int(0))
        .konst(Value::Int(7))
        .op(OpCode::ArraySet)
        .function("main", 0, 0);
    assert_eq!(
        kind_of(run_main(&module_of(vec![not_array]))),
        VmErrorKind::TypeError("array set")
    );
}

#[test]
fn test_returned_array_is_invalid_after_collection() {
    let make = Asm::default()
        .konst(Value::Int(1))
        .op(OpCode::ArrayNew)
        .op(OpCode::Return)
        .function("make", 0, 0);
    let module = module_of(vec![make]);
    let mut vm = Vm::with_io(&module, VmConfig::default(), BufferIo::new());

    let old = vm.invoke("make", vec![]).unwrap();
    assert_eq!(vm.array_items(&old).unwrap(), &[Value::Null]);

    vm.collect_garbage();
    let fresh = vm.new_array(vec![Value::Int(42), Value::Int(43)]);
    assert_eq!(old.as_object().unwrap().index(), fresh.as_object().unwrap().index());
    assert_eq!(vm.array_items(&old), None);
    assert_eq!(
        vm.array_items(&fresh).unwrap(),
        &[Value::Int(42), Value::Int(43)]
    );
}

#[test]
fn test_swap_jit_orders_adjacent_pair() {
    let swap = Asm::default()
        .local(OpCode::LoadLocal, 0)
        .local(OpCode::LoadLocal, 1)
        .op(OpCode::ArraySwapJit)
        .function("swap", 2, 2);
    let module = module_of(vec![swap]);
    let mut vm = Vm::with_io(&module, VmConfig::default(), BufferIo::new());

    let arr = vm.new_array(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
    vm.invoke("swap", vec![arr.clone(), Value::Int(0)]).unwrap();
    assert_eq!(
        vm.array_items(&arr).unwrap(),
        &[Value::Int(1), Value::Int(3), Value::Int(2)]
    );

    // 이미 정렬된 쌍은 그대로
    vm.invoke("swap", vec![arr.clone(), Value::Int(0)]).unwrap();
    assert_eq!(vm.array_items(&arr).unwrap()[0], Value::Int(1));

    let e = vm.invoke("swap", vec![arr.clone(), Value::Int(2)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::IndexOutOfRange);

    let floats = vm.new_array(vec![Value::Float(2.0), Value::Float(1.0)]);
    let e = vm.invoke("swap", vec![floats, Value::Int(0)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::TypeError("array swap"));
}

#[test]
fn test_stack_root_survives_collection_triggered_mid_frame() {
    // 첫 배열은 스택에만 있고, 두 번째 ArrayNew가 수집을 일으킴
    let main = Asm::default()
        .konst(Value::Int(1))
        .op(OpCode::ArrayNew)
        .konst(Value::Int(1))
        .op(OpCode::ArrayNew)
        .op(OpCode::Pop)
        .op(OpCode::Return)
        .function("main", 0, 0);
    let module = module_of(vec![main]);
    let config = VmConfig::default().with_gc_threshold(1);
    let mut vm = Vm::with_io(&module, config, BufferIo::new());

    let kept = vm.invoke("main", vec![]).unwrap();
    assert_eq!(vm.heap().collections(), 1);
    assert!(vm.array_items(&kept).is_some());
    assert_eq!(vm.heap().num_objects(), 2);

    // 호출이 끝나면 루트가 없음
    vm.collect_garbage();
    assert_eq!(vm.heap().num_objects(), 0);
    assert!(vm.array_items(&kept).is_none());
}

#[test]
fn test_caller_frame_is_a_root_during_nested_call() {
    let alloc = Asm::default()
        .konst(Value::Int(0))
        .op(OpCode::ArrayNew)
        .op(OpCode::Pop)
        .konst(Value::Int(0))
        .op(OpCode::ArrayNew)
        .op(OpCode::Pop)
        .op(OpCode::Return)
        .function("alloc", 0, 0);
    let main = Asm::default()
        .konst(Value::Int(3))
        .op(OpCode::ArrayNew)
        .local(OpCode::StoreLocal, 0)
        .call("alloc")
        .op(OpCode::Pop)
        .local(OpCode::LoadLocal, 0)
        .op(OpCode::Return)
        .function("main", 0, 1);
    let module = module_of(vec![alloc, main]);
    let config = VmConfig::default().with_gc_threshold(1).with_gc_headroom(0);
    let mut vm = Vm::with_io(&module, config, BufferIo::new());

    let arr = vm.invoke("main", vec![]).unwrap();
    assert!(vm.heap().collections() >= 1);
    assert_eq!(vm.array_items(&arr).unwrap().len(), 3);
}

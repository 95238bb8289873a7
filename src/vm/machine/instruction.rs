use super::{Vm, VmErrorKind, VmResult, err};
use crate::runtime_io::RuntimeIo;
use crate::vm::bytecode::{FunctionInfo, OpCode, Value};
use crate::vm::utils::{display_value, eq_vals, expect_bool, expect_int, type_name};
use crate::vm::value::{ObjRef, Object, ObjectKind};

/// 명령어 실행 결과
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionFlow {
    /// 다음 명령어 계속 실행
    Continue,
    /// 절대 오프셋으로 이동
    Jump(usize),
    /// 함수 리턴
    Return(Value),
}

impl<'m, IO: RuntimeIo> Vm<'m, IO> {
    /// 단일 명령어 실행 (디스패처)
    ///
    /// `arg`는 이미 디코딩된 피연산자입니다 (없으면 0).
    pub(super) fn execute_instruction(
        &mut self,
        op: OpCode,
        arg: usize,
        func: &'m FunctionInfo,
    ) -> VmResult<ExecutionFlow> {
        match op {
            // ===== 상수 / 로컬 =====
            OpCode::Const => self.handle_const(arg, func),
            OpCode::LoadLocal => {
                let v = self.get_local(arg)?;
                self.push(v);
                Ok(ExecutionFlow::Continue)
            }
            OpCode::StoreLocal => {
                let v = self.pop()?;
                self.set_local(arg, v)?;
                Ok(ExecutionFlow::Continue)
            }

            // ===== 산술 연산 =====
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                self.handle_arith(op)
            }
            OpCode::Neg => self.handle_neg(),

            // ===== 비교/논리 연산 =====
            OpCode::Eq | OpCode::Ne => {
                let (b, a) = (self.pop()?, self.pop()?);
                let eq = eq_vals(&a, &b);
                self.push(Value::Bool(if op == OpCode::Eq { eq } else { !eq }));
                Ok(ExecutionFlow::Continue)
            }
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => self.handle_compare(op),
            OpCode::Not => {
                let v = self.pop()?;
                let b = expect_bool(&v, "not")?;
                self.push(Value::Bool(!b));
                Ok(ExecutionFlow::Continue)
            }

            // ===== 제어 흐름 =====
            OpCode::Jump => Ok(ExecutionFlow::Jump(arg)),
            OpCode::JumpIfFalse => self.handle_jump_if_false(arg),
            OpCode::Pop => {
                self.pop()?;
                Ok(ExecutionFlow::Continue)
            }
            OpCode::Call => self.handle_call(arg, func),
            OpCode::Return => {
                // 스택이 비어 있으면 null
                let ret = self.frame.stack.last().cloned().unwrap_or(Value::Null);
                Ok(ExecutionFlow::Return(ret))
            }

            // ===== 배열 =====
            OpCode::ArrayNew => self.handle_array_new(),
            OpCode::ArrayGet => self.handle_array_get(),
            OpCode::ArraySet => self.handle_array_set(),
            OpCode::ArraySwapJit => self.handle_array_swap(),

            OpCode::Print => {
                let v = self.pop()?;
                let text = display_value(&v);
                self.io.write(&text);
                self.io.write(" ");
                Ok(ExecutionFlow::Continue)
            }
        }
    }

    fn handle_const(&mut self, idx: usize, func: &'m FunctionInfo) -> VmResult<ExecutionFlow> {
        let v = func.chunk.constants.get(idx).cloned().ok_or_else(|| {
            err(
                VmErrorKind::BadConstant,
                format!("const index {} out of range", idx),
            )
        })?;
        self.push(v);
        Ok(ExecutionFlow::Continue)
    }

    // ========== 산술 ==========

    fn handle_arith(&mut self, op: OpCode) -> VmResult<ExecutionFlow> {
        let (b, a) = (self.pop()?, self.pop()?);
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(int_arith(op, *x, *y)?),
            (Value::Float(x), Value::Float(y)) => Value::Float(float_arith(op, *x, *y)),
            _ => return Err(operand_error(op, &a, &b)),
        };
        self.push(result);
        Ok(ExecutionFlow::Continue)
    }

    fn handle_neg(&mut self) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let result = match v {
            Value::Int(i) => Value::Int(i.wrapping_neg()),
            Value::Float(f) => Value::Float(-f),
            other => {
                return Err(err(
                    VmErrorKind::TypeError(OpCode::Neg.into()),
                    format!("Neg: unsupported operand type {}", type_name(&other)),
                ));
            }
        };
        self.push(result);
        Ok(ExecutionFlow::Continue)
    }

    fn handle_compare(&mut self, op: OpCode) -> VmResult<ExecutionFlow> {
        let (b, a) = (self.pop()?, self.pop()?);
        let ord = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
            _ => return Err(operand_error(op, &a, &b)),
        };
        // NaN과의 비교는 모두 false
        let result = ord.is_some_and(|o| match op {
            OpCode::Lt => o.is_lt(),
            OpCode::Le => o.is_le(),
            OpCode::Gt => o.is_gt(),
            _ => o.is_ge(),
        });
        self.push(Value::Bool(result));
        Ok(ExecutionFlow::Continue)
    }

    // ========== 제어 흐름 ==========

    /// 조건값은 pop하지 않습니다. 컴파일러가 양쪽 경로에 Pop을 넣습니다.
    fn handle_jump_if_false(&mut self, target: usize) -> VmResult<ExecutionFlow> {
        let top = self
            .frame
            .stack
            .last()
            .ok_or_else(|| err(VmErrorKind::StackUnderflow, "stack underflow".into()))?;
        if expect_bool(top, "jump condition")? {
            Ok(ExecutionFlow::Continue)
        } else {
            Ok(ExecutionFlow::Jump(target))
        }
    }

    fn handle_call(&mut self, idx: usize, func: &'m FunctionInfo) -> VmResult<ExecutionFlow> {
        let name = match func.chunk.constants.get(idx) {
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(err(
                    VmErrorKind::BadConstant,
                    format!("call: const is {}, not a function name", type_name(other)),
                ));
            }
            None => {
                return Err(err(
                    VmErrorKind::BadConstant,
                    format!("call: const index {} out of range", idx),
                ));
            }
        };
        let module = self.module;
        let callee = module.function(name).ok_or_else(|| {
            err(
                VmErrorKind::UnknownFunction,
                format!("unknown function {:?}", name),
            )
        })?;

        let n = callee.param_count;
        let depth = self.frame.stack.len();
        if depth < n {
            return Err(err(
                VmErrorKind::StackUnderflow,
                format!("call {:?}: stack has {} values, want {} args", name, depth, n),
            ));
        }
        let args = self.frame.stack.split_off(depth - n);

        let ret = self.run_function(callee, args)?;
        self.push(ret);
        Ok(ExecutionFlow::Continue)
    }

    // ========== 배열 ==========

    fn handle_array_new(&mut self) -> VmResult<ExecutionFlow> {
        let len = self.pop()?;
        let len = expect_int(&len, "array new")?;
        if len < 0 {
            return Err(err(
                VmErrorKind::NegativeLength,
                format!("array new: length must be >= 0, got {}", len),
            ));
        }

        if self.heap.needs_collection() {
            self.collect_garbage();
        }
        let r = usize::try_from(len)
            .ok()
            .and_then(|n| self.heap.alloc_array(n))
            .ok_or_else(|| {
                err(
                    VmErrorKind::AllocationFailed,
                    format!("array new: cannot allocate {} elements", len),
                )
            })?;
        self.push(Value::Object(r));
        Ok(ExecutionFlow::Continue)
    }

    fn handle_array_get(&mut self) -> VmResult<ExecutionFlow> {
        let (idx, arr) = (self.pop()?, self.pop()?);
        let obj = self.array_mut(&arr, "array get")?;
        let ix = checked_index(obj, &idx, "array get")?;
        let v = obj.items[ix].clone();
        self.push(v);
        Ok(ExecutionFlow::Continue)
    }

    fn handle_array_set(&mut self) -> VmResult<ExecutionFlow> {
        let (val, idx, arr) = (self.pop()?, self.pop()?, self.pop()?);
        let obj = self.array_mut(&arr, "array set")?;
        let ix = checked_index(obj, &idx, "array set")?;
        obj.items[ix] = val;
        Ok(ExecutionFlow::Continue)
    }

    /// `items[j] > items[j+1]`이면 두 원소를 교환
    fn handle_array_swap(&mut self) -> VmResult<ExecutionFlow> {
        let (idx, arr) = (self.pop()?, self.pop()?);
        let obj = self.array_mut(&arr, "array swap")?;
        let j = expect_int(&idx, "array swap")?;

        let len = obj.items.len();
        let pair = usize::try_from(j)
            .ok()
            .filter(|&j| j.checked_add(1).is_some_and(|k| k < len));
        let Some(j) = pair else {
            return Err(err(
                VmErrorKind::IndexOutOfRange,
                format!("array swap: index {} out of range", j),
            ));
        };

        let (a, b) = match (&obj.items[j], &obj.items[j + 1]) {
            (Value::Int(a), Value::Int(b)) => (*a, *b),
            (a, b) => {
                return Err(err(
                    VmErrorKind::TypeError("array swap"),
                    format!(
                        "array swap: non-int elements {} and {}",
                        type_name(a),
                        type_name(b)
                    ),
                ));
            }
        };
        if a > b {
            obj.items.swap(j, j + 1);
        }
        Ok(ExecutionFlow::Continue)
    }

    fn array_mut(&mut self, v: &Value, what: &'static str) -> VmResult<&mut Object> {
        let not_array = || {
            err(
                VmErrorKind::TypeError(what),
                format!("{}: {} is not an array", what, type_name(v)),
            )
        };
        let r: ObjRef = v.as_object().ok_or_else(not_array)?;
        match self.heap.get_mut(r) {
            Some(obj) if obj.kind == ObjectKind::Array => Ok(obj),
            _ => Err(not_array()),
        }
    }
}

fn checked_index(obj: &Object, idx: &Value, what: &'static str) -> VmResult<usize> {
    let i = expect_int(idx, what)?;
    let len = obj.items.len();
    usize::try_from(i).ok().filter(|&i| i < len).ok_or_else(|| {
        err(
            VmErrorKind::IndexOutOfRange,
            format!("{}: index {} out of range [0,{})", what, i, len),
        )
    })
}

fn operand_error(op: OpCode, a: &Value, b: &Value) -> super::VmError {
    err(
        VmErrorKind::TypeError(op.into()),
        format!(
            "{}: unsupported operand types {} and {}",
            op,
            type_name(a),
            type_name(b)
        ),
    )
}

/// 정수 연산은 wrap-around. 0으로 나누기/나머지는 오류
fn int_arith(op: OpCode, x: i64, y: i64) -> VmResult<i64> {
    let zero_division = || err(VmErrorKind::ZeroDivision, format!("{}: division by zero", op));
    Ok(match op {
        OpCode::Add => x.wrapping_add(y),
        OpCode::Sub => x.wrapping_sub(y),
        OpCode::Mul => x.wrapping_mul(y),
        OpCode::Div => {
            if y == 0 {
                return Err(zero_division());
            }
            x.wrapping_div(y)
        }
        OpCode::Mod => {
            if y == 0 {
                return Err(zero_division());
            }
            x.wrapping_rem(y)
        }
        // 부동소수점으로 계산 후 절삭
        _ => (x as f64).powf(y as f64) as i64,
    })
}

fn float_arith(op: OpCode, x: f64, y: f64) -> f64 {
    match op {
        OpCode::Add => x + y,
        OpCode::Sub => x - y,
        OpCode::Mul => x * y,
        OpCode::Div => x / y,
        OpCode::Mod => x % y,
        _ => x.powf(y),
    }
}

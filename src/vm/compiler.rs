use super::bytecode::{Chunk, DuplicateFunction, FunctionInfo, Module, OpCode, TypeKind, Value};
use crate::ast::{BinaryOp, Block, Expr, FnDecl, Program, Stmt, TypeRef, UnaryOp};
use thiserror::Error;
use tracing::debug;

/// 배열 리터럴을 만들 때 쓰는 합성 로컬 이름
const ARRAY_TEMP: &str = "$tmp_arr";

/// 시맨틱 분석을 통과한 트리에서는 일어날 수 없는 위반
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("print expects exactly 1 argument, got {0}")]
    PrintArity(usize),
    #[error("if expression without else branch")]
    IfWithoutElse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateFunction),
    #[error("too many locals in function {function}")]
    TooManyLocals { function: String },
    #[error("too many constants in function {function}")]
    TooManyConstants { function: String },
    #[error("code too large in function {function}")]
    CodeTooLarge { function: String },
    #[error("internal compiler error: {0}")]
    Internal(#[from] InvariantViolation),
}

impl CompileError {
    /// 프런트엔드 버그를 뜻하는 오류인지
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal(_))
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Loop context for tracking break/continue jumps
#[derive(Debug, Default)]
struct LoopContext {
    /// Operand offsets of break jumps, patched to the loop exit
    break_jumps: Vec<usize>,
    /// Operand offsets of continue jumps, patched to the continue target
    continue_jumps: Vec<usize>,
}

#[derive(Debug)]
struct LocalVar {
    name: String,
    slot: u8,
}

pub struct Compiler {
    module: Module,
    function: String,
    chunk: Chunk,
    locals: Vec<LocalVar>,
    num_locals: usize,
    loop_stack: Vec<LoopContext>,
}

impl Compiler {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module: Module::new(module_name),
            function: String::new(),
            chunk: Chunk::new(),
            locals: Vec::new(),
            num_locals: 0,
            loop_stack: Vec::new(),
        }
    }

    /// 프로그램 전체를 컴파일
    ///
    /// 1단계에서 모든 함수 시그니처를 등록하고 (전방 참조, 재귀 허용)
    /// 2단계에서 본문을 컴파일합니다. 첫 오류에서 중단하며 부분 모듈은 반환하지 않습니다.
    pub fn compile(mut self, program: &Program) -> CompileResult<Module> {
        for decl in program.functions() {
            let mut info = FunctionInfo::new(decl.name.as_str(), decl.params.len());
            for param in &decl.params {
                info.add_parameter(type_kind(&param.ty));
            }
            info.set_return_type(decl.ret_type.as_ref().map_or(TypeKind::Void, type_kind));
            self.module.add_function(info)?;
            debug!(function = %decl.name, params = decl.params.len(), "registered function");
        }

        for decl in program.functions() {
            self.compile_function(decl)?;
        }
        Ok(self.module)
    }

    fn compile_function(&mut self, decl: &FnDecl) -> CompileResult<()> {
        self.function = decl.name.clone();
        self.chunk = Chunk::new();
        self.locals.clear();
        self.num_locals = 0;
        self.loop_stack.clear();

        for param in &decl.params {
            self.add_local(&param.name)?;
        }

        self.compile_block(&decl.body, false)?;

        // fall-through 대비
        self.emit_const(Value::Null)?;
        self.emit_op(OpCode::Return);

        let chunk = std::mem::take(&mut self.chunk);
        debug!(
            function = %decl.name,
            code = chunk.len(),
            constants = chunk.constants.len(),
            locals = self.num_locals,
            "compiled function"
        );

        let name = decl.name.as_str();
        let info = self
            .module
            .function_mut(name)
            .ok_or_else(|| InvariantViolation::UnknownFunction(name.to_string()))?;
        info.chunk = chunk;
        info.reserve_locals(self.num_locals);
        Ok(())
    }

    // ========== 로컬 ==========

    /// 새 슬롯을 할당. 같은 함수 안에서 슬롯은 재사용되지 않습니다.
    fn add_local(&mut self, name: &str) -> CompileResult<u8> {
        let slot = u8::try_from(self.locals.len()).map_err(|_| CompileError::TooManyLocals {
            function: self.function.clone(),
        })?;
        self.locals.push(LocalVar {
            name: name.to_string(),
            slot,
        });
        self.num_locals = self.num_locals.max(slot as usize + 1);
        Ok(slot)
    }

    /// innermost-first 선형 탐색
    fn resolve_local(&self, name: &str) -> CompileResult<u8> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| l.slot)
            .ok_or_else(|| InvariantViolation::UnknownVariable(name.to_string()).into())
    }

    // ========== 블록 / 문장 ==========

    fn compile_block(&mut self, block: &Block, as_expr: bool) -> CompileResult<()> {
        for stmt in &block.stmts {
            self.compile_stmt(stmt)?;
        }

        match &block.tail {
            Some(tail) => {
                self.compile_expr(tail)?;
                if !as_expr {
                    self.emit_op(OpCode::Pop);
                }
            }
            None if as_expr => self.emit_const(Value::Null)?,
            None => {}
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Block(block) => self.compile_block(block, false),
            Stmt::Let { name, init, .. } => {
                match init {
                    Some(e) => self.compile_expr(e)?,
                    None => self.emit_const(Value::Null)?,
                }
                // 초기화 식 안에서는 아직 새 이름이 보이지 않음
                let slot = self.add_local(name)?;
                self.emit_local(OpCode::StoreLocal, slot);
                Ok(())
            }
            Stmt::Assign { name, value } => {
                self.compile_expr(value)?;
                let slot = self.resolve_local(name)?;
                self.emit_local(OpCode::StoreLocal, slot);
                Ok(())
            }
            Stmt::IndexAssign {
                target,
                index,
                value,
            } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit_op(OpCode::ArraySet);
                Ok(())
            }
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.emit_op(OpCode::Pop);
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.compile_expr(e)?,
                    None => self.emit_const(Value::Null)?,
                }
                self.emit_op(OpCode::Return);
                Ok(())
            }
            Stmt::If {
                cond,
                then,
                else_branch,
            } => {
                self.compile_expr(cond)?;
                let to_else = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.compile_block(then, false)?;
                let to_end = self.emit_jump(OpCode::Jump);

                self.patch_jump(to_else)?;
                self.emit_op(OpCode::Pop);
                if let Some(else_branch) = else_branch {
                    self.compile_stmt(else_branch)?;
                }
                self.patch_jump(to_end)
            }
            Stmt::While { cond, body } => {
                let loop_start = self.chunk.len();
                self.loop_stack.push(LoopContext::default());

                self.compile_expr(cond)?;
                let exit = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.compile_block(body, false)?;
                self.emit_jump_to(OpCode::Jump, loop_start)?;

                self.patch_jump(exit)?;
                self.emit_op(OpCode::Pop);

                let after = self.chunk.len();
                self.end_loop(loop_start, after)
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
            } => {
                if let Some(init) = init {
                    self.compile_stmt(init)?;
                }

                let loop_start = self.chunk.len();
                self.loop_stack.push(LoopContext::default());

                // 조건이 없으면 탈출 검사 없는 무한 루프
                let exit = match cond {
                    Some(cond) => {
                        self.compile_expr(cond)?;
                        let exit = self.emit_jump(OpCode::JumpIfFalse);
                        self.emit_op(OpCode::Pop);
                        Some(exit)
                    }
                    None => None,
                };

                self.compile_block(body, false)?;

                let mut continue_target = loop_start;
                if let Some(post) = post {
                    continue_target = self.chunk.len();
                    self.compile_stmt(post)?;
                }
                self.emit_jump_to(OpCode::Jump, loop_start)?;

                if let Some(exit) = exit {
                    self.patch_jump(exit)?;
                    self.emit_op(OpCode::Pop);
                }

                let after = self.chunk.len();
                self.end_loop(continue_target, after)
            }
        }
    }

    /// 현재 루프의 break/continue 목록을 모두 해결
    fn end_loop(&mut self, continue_target: usize, exit_target: usize) -> CompileResult<()> {
        let Some(ctx) = self.loop_stack.pop() else {
            return Ok(());
        };
        let continue_target = self.jump_operand(continue_target)?;
        let exit_target = self.jump_operand(exit_target)?;
        for at in ctx.continue_jumps {
            self.chunk.patch_u16(at, continue_target);
        }
        for at in ctx.break_jumps {
            self.chunk.patch_u16(at, exit_target);
        }
        Ok(())
    }

    // ========== 식 ==========

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Int(i) => self.emit_const(Value::Int(*i)),
            Expr::Float(f) => self.emit_const(Value::Float(*f)),
            Expr::Bool(b) => self.emit_const(Value::Bool(*b)),
            Expr::Str(s) => self.emit_const(Value::String(s.clone())),
            Expr::Char(c) => self.emit_const(Value::Char(*c)),
            Expr::Null => self.emit_const(Value::Null),
            Expr::Var(name) => {
                let slot = self.resolve_local(name)?;
                self.emit_local(OpCode::LoadLocal, slot);
                Ok(())
            }
            Expr::Unary { op, expr } => {
                self.compile_expr(expr)?;
                self.emit_op(match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Not => OpCode::Not,
                });
                Ok(())
            }
            Expr::Binary { op, left, right } => self.compile_binary(*op, left, right),
            Expr::Call { callee, args } => self.compile_call(callee, args),
            Expr::Block(block) => self.compile_block(block, true),
            Expr::If {
                cond,
                then,
                else_branch,
            } => {
                let else_branch = else_branch.as_ref().ok_or(InvariantViolation::IfWithoutElse)?;

                self.compile_expr(cond)?;
                let to_else = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.compile_block(then, true)?;
                let to_end = self.emit_jump(OpCode::Jump);

                self.patch_jump(to_else)?;
                self.emit_op(OpCode::Pop);
                self.compile_expr(else_branch)?;
                self.patch_jump(to_end)
            }
            Expr::Array(elems) => self.compile_array_literal(elems),
            Expr::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit_op(OpCode::ArrayGet);
                Ok(())
            }
        }
    }

    fn compile_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> CompileResult<()> {
        let opcode = match op {
            // L; JumpIfFalse end; Pop; R; end:
            BinaryOp::And => {
                self.compile_expr(left)?;
                let to_end = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.compile_expr(right)?;
                return self.patch_jump(to_end);
            }
            // L; JumpIfFalse right; Jump end; right: Pop; R; end:
            BinaryOp::Or => {
                self.compile_expr(left)?;
                let to_right = self.emit_jump(OpCode::JumpIfFalse);
                let to_end = self.emit_jump(OpCode::Jump);
                self.patch_jump(to_right)?;
                self.emit_op(OpCode::Pop);
                self.compile_expr(right)?;
                return self.patch_jump(to_end);
            }
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::Pow => OpCode::Pow,
            BinaryOp::Eq => OpCode::Eq,
            BinaryOp::Ne => OpCode::Ne,
            BinaryOp::Lt => OpCode::Lt,
            BinaryOp::Le => OpCode::Le,
            BinaryOp::Gt => OpCode::Gt,
            BinaryOp::Ge => OpCode::Ge,
        };

        self.compile_expr(left)?;
        self.compile_expr(right)?;
        self.emit_op(opcode);
        Ok(())
    }

    fn compile_call(&mut self, callee: &str, args: &[Expr]) -> CompileResult<()> {
        for arg in args {
            self.compile_expr(arg)?;
        }

        // print 내장 함수: 값을 출력하고 호출 결과로 null을 push
        if callee == "print" {
            if args.len() != 1 {
                return Err(InvariantViolation::PrintArity(args.len()).into());
            }
            self.emit_op(OpCode::Print);
            return self.emit_const(Value::Null);
        }

        if !self.module.contains(callee) {
            return Err(InvariantViolation::UnknownFunction(callee.to_string()).into());
        }
        let idx = self.add_constant(Value::String(callee.to_string()))?;
        self.emit_op(OpCode::Call);
        self.chunk.write_u16(idx);
        Ok(())
    }

    /// `[e0, e1, ...]` → 길이 상수, ArrayNew, 임시 로컬에 저장 후 원소별 ArraySet
    fn compile_array_literal(&mut self, elems: &[Expr]) -> CompileResult<()> {
        self.emit_const(Value::Int(elems.len() as i64))?;
        self.emit_op(OpCode::ArrayNew);

        let tmp = self.add_local(ARRAY_TEMP)?;
        self.emit_local(OpCode::StoreLocal, tmp);

        for (i, elem) in elems.iter().enumerate() {
            self.emit_local(OpCode::LoadLocal, tmp);
            self.emit_const(Value::Int(i as i64))?;
            self.compile_expr(elem)?;
            self.emit_op(OpCode::ArraySet);
        }

        self.emit_local(OpCode::LoadLocal, tmp);
        Ok(())
    }

    // ========== emit 헬퍼 ==========

    fn emit_op(&mut self, op: OpCode) {
        self.chunk.write_op(op);
    }

    fn emit_local(&mut self, op: OpCode, slot: u8) {
        self.chunk.write_op(op);
        self.chunk.write_byte(slot);
    }

    fn add_constant(&mut self, v: Value) -> CompileResult<u16> {
        let idx = self.chunk.add_constant(v);
        u16::try_from(idx).map_err(|_| CompileError::TooManyConstants {
            function: self.function.clone(),
        })
    }

    /// 상수는 중복 제거 없이 매번 새로 추가됩니다
    fn emit_const(&mut self, v: Value) -> CompileResult<()> {
        let idx = self.add_constant(v)?;
        self.chunk.write_op(OpCode::Const);
        self.chunk.write_u16(idx);
        Ok(())
    }

    /// placeholder 점프를 쓰고 피연산자 오프셋을 반환
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.chunk.write_op(op);
        let at = self.chunk.len();
        self.chunk.write_u16(0);
        at
    }

    fn emit_jump_to(&mut self, op: OpCode, target: usize) -> CompileResult<()> {
        let target = self.jump_operand(target)?;
        self.chunk.write_op(op);
        self.chunk.write_u16(target);
        Ok(())
    }

    /// `at`의 점프를 현재 위치로 해결
    fn patch_jump(&mut self, at: usize) -> CompileResult<()> {
        debug_assert!(at + 2 <= self.chunk.len(), "patch offset past end of code");
        let target = self.jump_operand(self.chunk.len())?;
        self.chunk.patch_u16(at, target);
        Ok(())
    }

    fn jump_operand(&self, target: usize) -> CompileResult<u16> {
        u16::try_from(target).map_err(|_| CompileError::CodeTooLarge {
            function: self.function.clone(),
        })
    }
}

fn type_kind(ty: &TypeRef) -> TypeKind {
    match ty {
        TypeRef::Int => TypeKind::Int,
        TypeRef::Float => TypeKind::Float,
        TypeRef::Bool => TypeKind::Bool,
        TypeRef::String => TypeKind::String,
        TypeRef::Char => TypeKind::Char,
        TypeRef::Void => TypeKind::Void,
        TypeRef::Null => TypeKind::Null,
        TypeRef::Array(_) => TypeKind::Array,
    }
}

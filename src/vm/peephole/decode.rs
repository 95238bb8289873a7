use crate::vm::bytecode::OpCode;

/// 디코딩된 명령어 하나
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    /// 피연산자 (없으면 0)
    pub arg: u16,
    pub size: usize,
}

/// `at` 위치의 명령어를 디코딩
///
/// 알 수 없는 opcode이거나 피연산자가 잘려 있으면 `None`.
pub fn decode(code: &[u8], at: usize) -> Option<Instruction> {
    let op = OpCode::from_repr(*code.get(at)?)?;
    let size = op.size();
    let operand = code.get(at + 1..at + size)?;
    let arg = match *operand {
        [] => 0,
        [b] => b as u16,
        [hi, lo] => u16::from_be_bytes([hi, lo]),
        _ => return None,
    };
    Some(Instruction { op, arg, size })
}

/// 명령어 단위로 전진하는 읽기 커서
#[derive(Debug, Clone)]
pub struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8], pos: usize) -> Self {
        Self { code, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn next_instruction(&mut self) -> Option<Instruction> {
        let ins = decode(self.code, self.pos)?;
        self.pos += ins.size;
        Some(ins)
    }

    /// 다음 명령어가 `op`이면 피연산자를 반환하고 전진
    pub fn expect_arg(&mut self, op: OpCode) -> Option<u16> {
        let ins = decode(self.code, self.pos)?;
        if ins.op != op {
            return None;
        }
        self.pos += ins.size;
        Some(ins.arg)
    }

    pub fn expect(&mut self, op: OpCode) -> Option<()> {
        self.expect_arg(op).map(|_| ())
    }

    /// 다음 명령어가 `op slot`이면 전진
    pub fn expect_slot(&mut self, op: OpCode, slot: u16) -> Option<()> {
        let save = self.pos;
        match self.expect_arg(op) {
            Some(s) if s == slot => Some(()),
            _ => {
                self.pos = save;
                None
            }
        }
    }
}

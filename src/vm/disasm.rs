use super::bytecode::{Chunk, FunctionInfo, Module, OpCode};
use super::peephole::decode;
use super::utils::display_value;
use std::fmt::{self, Write};

pub fn disassemble_module_to_string(module: &Module) -> String {
    let mut output = String::new();
    let _ = disassemble_module(module, &mut output);
    output
}

/// 함수는 이름순으로 출력합니다
pub fn disassemble_module(module: &Module, w: &mut impl Write) -> fmt::Result {
    writeln!(w, "=== Module {} ===", module.name)?;
    writeln!(w)?;

    writeln!(w, "Functions ({}):", module.function_count())?;
    for func in module.sorted_functions() {
        disassemble_function(func, w)?;
        writeln!(w)?;
    }

    Ok(())
}

pub fn disassemble_function(func: &FunctionInfo, w: &mut impl Write) -> fmt::Result {
    let params: Vec<String> = func.param_types.iter().map(ToString::to_string).collect();
    writeln!(
        w,
        "Function {} ({}) -> {} (locals={})",
        func.name,
        params.join(", "),
        func.return_type,
        func.num_locals
    )?;
    writeln!(w, "  Instructions:")?;
    disassemble_chunk(&func.chunk, w)
}

pub fn disassemble_chunk(chunk: &Chunk, w: &mut impl Write) -> fmt::Result {
    let mut ip = 0;
    while ip < chunk.code.len() {
        write!(w, "    {:4}: ", ip)?;
        let Some(ins) = decode(&chunk.code, ip) else {
            // 디코딩할 수 없는 나머지는 바이트로 출력
            writeln!(w, "<bad {:?}>", &chunk.code[ip..])?;
            break;
        };

        match ins.op {
            OpCode::Const | OpCode::Call => match chunk.constants.get(ins.arg as usize) {
                Some(v) => write!(w, "{} {} ({})", ins.op, ins.arg, display_value(v))?,
                None => write!(w, "{} {} (<out of range>)", ins.op, ins.arg)?,
            },
            OpCode::LoadLocal | OpCode::StoreLocal => write!(w, "{} {}", ins.op, ins.arg)?,
            OpCode::Jump | OpCode::JumpIfFalse => write!(w, "{} -> {}", ins.op, ins.arg)?,
            // No arg
            _ => write!(w, "{}", ins.op)?,
        }
        writeln!(w)?;
        ip += ins.size;
    }
    Ok(())
}

pub mod ast;
pub mod config;
pub mod runtime_io;
pub mod vm;

pub use config::VmConfig;
pub use runtime_io::{BufferIo, RuntimeIo, StdIo};
pub use vm::{CompileError, Module, Value, Vm, VmError, VmErrorKind};

use thiserror::Error;

/// 드라이버 쪽 오류: 컴파일 실패, 실행 실패, 모듈 이미지 손상
#[derive(Debug, Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("runtime error: {0}")]
    Runtime(#[from] VmError),
    #[error("encode module: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode module: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub fn compile(program: &ast::Program) -> Result<Module, CompileError> {
    vm::Compiler::new("main").compile(program)
}

/// 최적화 패스를 적용한 사본
pub fn optimized(module: &Module) -> Module {
    let mut module = module.clone();
    vm::peephole::optimize_module(&mut module);
    module
}

/// `config.optimize`면 실행 전에 모든 함수를 최적화하고 `name`을 호출
pub fn invoke_with_io<IO: RuntimeIo>(
    module: &Module,
    name: &str,
    args: Vec<Value>,
    config: VmConfig,
    io: IO,
) -> Result<Value, VmError> {
    let optimized_module;
    let module = if config.optimize {
        optimized_module = optimized(module);
        &optimized_module
    } else {
        module
    };
    let mut machine = Vm::with_io(module, config, io);
    machine.invoke(name, args)
}

pub fn invoke(
    module: &Module,
    name: &str,
    args: Vec<Value>,
    config: VmConfig,
) -> Result<Value, VmError> {
    invoke_with_io(module, name, args, config, StdIo)
}

/// 컴파일 후 바로 실행
pub fn run(
    program: &ast::Program,
    name: &str,
    args: Vec<Value>,
    config: VmConfig,
) -> Result<Value, Error> {
    let module = compile(program)?;
    Ok(invoke(&module, name, args, config)?)
}

pub fn encode_module(module: &Module) -> Result<Vec<u8>, Error> {
    let cfg = bincode::config::standard();
    Ok(bincode::serde::encode_to_vec(module, cfg)?)
}

pub fn decode_module(bytes: &[u8]) -> Result<Module, Error> {
    let cfg = bincode::config::standard();
    let (module, _consumed): (Module, usize) = bincode::serde::decode_from_slice(bytes, cfg)?;
    Ok(module)
}

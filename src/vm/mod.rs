pub mod bytecode;
pub mod compiler;
pub mod disasm; // 디스어셈블러
pub mod heap; // 힙 + mark-sweep 수집기
pub mod machine; // machine/ 디렉토리
pub mod peephole; // 교환 패턴 융합 최적화
pub mod utils; // 유틸리티 함수
pub mod value;

pub use bytecode::{Chunk, FunctionInfo, Module, OpCode, TypeKind};
pub use compiler::{CompileError, Compiler, InvariantViolation};
pub use heap::{CollectStats, Heap};
pub use machine::{Vm, VmError, VmErrorKind, VmResult, err};
pub use value::{ObjRef, Object, ObjectKind, Value};

//! VM 설정
//!
//! 수집기 threshold, 최적화 여부, 호출 깊이 제한을 정의합니다.
//! 설정은 값만 담고 있으며 적용은 VM이 합니다.

use crate::vm::heap::{DEFAULT_HEADROOM, DEFAULT_THRESHOLD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// 첫 수집 전까지 허용되는 살아있는 객체 수
    pub initial_gc_threshold: usize,

    /// 수집 후 threshold = 2 * live + headroom (최소 1로 적용)
    pub gc_headroom: usize,

    /// 실행 전에 peephole 최적화를 모든 함수에 적용
    pub optimize: bool,

    /// 동시에 활성화될 수 있는 최대 프레임 수. `None`이면 호스트 스택에만 의존
    pub max_call_depth: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            initial_gc_threshold: DEFAULT_THRESHOLD,
            gc_headroom: DEFAULT_HEADROOM,
            optimize: false,
            max_call_depth: None,
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gc_threshold(mut self, threshold: usize) -> Self {
        self.initial_gc_threshold = threshold;
        self
    }

    pub fn with_gc_headroom(mut self, headroom: usize) -> Self {
        self.gc_headroom = headroom;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = Some(depth);
        self
    }
}

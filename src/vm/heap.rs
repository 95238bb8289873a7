//! 힙과 mark-sweep 수집기
//!
//! 객체는 슬롯 테이블에 저장되고 `ObjRef`는 슬롯 인덱스 + 세대입니다.
//! 해제된 슬롯은 tombstone이 되고 세대가 올라간 뒤 free list로 재사용됩니다.
//!
//! 수집은 stop-the-world입니다:
//! 1. mark: 루트 값에서 도달 가능한 모든 객체의 mark 비트 설정
//! 2. sweep: 슬롯을 한 번 순회하며 mark되지 않은 객체 해제, 살아남은 객체의 mark 해제
//! 3. threshold 갱신: `2 * live + headroom`

use super::value::{ObjRef, Object, Value};
use tracing::debug;

pub const DEFAULT_THRESHOLD: usize = 8;
pub const DEFAULT_HEADROOM: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectStats {
    pub live_before: usize,
    pub live_after: usize,
    pub freed: usize,
    pub threshold: usize,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<Object>,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    num_objects: usize,
    max_objects: usize,
    headroom: usize,
    collections: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_HEADROOM)
    }
}

impl Heap {
    /// `headroom`은 최소 1로 올립니다 (살아있는 객체가 없을 때 threshold 0 방지)
    pub fn new(initial_threshold: usize, headroom: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            num_objects: 0,
            max_objects: initial_threshold.max(1),
            headroom: headroom.max(1),
            collections: 0,
        }
    }

    pub fn num_objects(&self) -> usize {
        self.num_objects
    }

    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    pub fn collections(&self) -> usize {
        self.collections
    }

    /// 다음 할당 전에 수집이 필요한지
    pub fn needs_collection(&self) -> bool {
        self.num_objects >= self.max_objects
    }

    /// 객체를 슬롯에 넣고 참조를 반환
    ///
    /// threshold 검사는 하지 않습니다. 루트를 아는 호출자(VM)가 먼저 `collect`를 실행해야 합니다.
    pub fn insert(&mut self, obj: Object) -> ObjRef {
        self.num_objects += 1;
        let ix = match self.free.pop() {
            Some(ix) => ix,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[ix as usize];
        slot.object = Some(obj);
        ObjRef::new(ix, slot.generation)
    }

    /// 길이 `len` 배열 할당. 메모리를 확보할 수 없으면 `None`
    pub fn alloc_array(&mut self, len: usize) -> Option<ObjRef> {
        Object::try_array(len).map(|obj| self.insert(obj))
    }

    /// 해제된 슬롯이나 옛 세대의 참조는 `None`
    pub fn get(&self, r: ObjRef) -> Option<&Object> {
        self.slots
            .get(r.index())
            .filter(|s| s.generation == r.generation())
            .and_then(|s| s.object.as_ref())
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut Object> {
        self.slots
            .get_mut(r.index())
            .filter(|s| s.generation == r.generation())
            .and_then(|s| s.object.as_mut())
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.get(r).is_some()
    }

    /// 살아있는 객체 참조들 (슬롯 순서)
    pub fn live_refs(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.object.is_some())
            .map(|(i, s)| ObjRef::new(i as u32, s.generation))
    }

    /// 주어진 루트 값들로 전체 수집을 수행
    pub fn collect<'a>(&mut self, roots: impl IntoIterator<Item = &'a Value>) -> CollectStats {
        let live_before = self.num_objects;
        self.mark_from(roots);
        let freed = self.sweep();
        self.max_objects = self.num_objects * 2 + self.headroom;
        self.collections += 1;

        let stats = CollectStats {
            live_before,
            live_after: self.num_objects,
            freed,
            threshold: self.max_objects,
        };
        debug!(
            live_before = stats.live_before,
            live_after = stats.live_after,
            freed = stats.freed,
            threshold = stats.threshold,
            "gc cycle"
        );
        stats
    }

    fn mark_from<'a>(&mut self, roots: impl IntoIterator<Item = &'a Value>) {
        let mut gray: Vec<ObjRef> = roots.into_iter().filter_map(Value::as_object).collect();
        while let Some(r) = gray.pop() {
            let Some(obj) = self.get_mut(r) else { continue };
            if obj.marked {
                continue;
            }
            obj.marked = true;
            gray.extend(obj.children());
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            let Some(obj) = slot.object.as_mut() else { continue };
            if obj.marked {
                obj.marked = false;
                continue;
            }
            slot.object = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(ix as u32);
            freed += 1;
        }
        self.num_objects -= freed;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(heap: &mut Heap, len: usize) -> ObjRef {
        heap.alloc_array(len).expect("alloc")
    }

    #[test]
    fn test_unrooted_objects_are_freed() {
        let mut heap = Heap::default();
        for _ in 0..5 {
            alloc(&mut heap, 2);
        }
        assert_eq!(heap.num_objects(), 5);
        let stats = heap.collect(std::iter::empty());
        assert_eq!(stats.freed, 5);
        assert_eq!(heap.num_objects(), 0);
        assert_eq!(heap.max_objects(), DEFAULT_HEADROOM);
    }

    #[test]
    fn test_rooted_object_survives_and_is_unmarked() {
        let mut heap = Heap::default();
        let keep = alloc(&mut heap, 1);
        alloc(&mut heap, 1);
        let roots = [Value::Object(keep), Value::Int(3)];
        heap.collect(roots.iter());
        assert!(heap.contains(keep));
        assert_eq!(heap.num_objects(), 1);
        assert!(!heap.get(keep).unwrap().marked);
        assert_eq!(heap.max_objects(), 2 + DEFAULT_HEADROOM);
    }

    #[test]
    fn test_children_are_traced() {
        let mut heap = Heap::default();
        let outer = alloc(&mut heap, 1);
        let inner = alloc(&mut heap, 1);
        let leaf = alloc(&mut heap, 0);
        heap.get_mut(outer).unwrap().items[0] = Value::Object(inner);
        heap.get_mut(inner).unwrap().items[0] = Value::Object(leaf);
        let garbage = alloc(&mut heap, 0);

        heap.collect([Value::Object(outer)].iter());
        assert!(heap.contains(outer));
        assert!(heap.contains(inner));
        assert!(heap.contains(leaf));
        assert!(!heap.contains(garbage));
    }

    #[test]
    fn test_cycles_terminate() {
        let mut heap = Heap::default();
        let a = alloc(&mut heap, 1);
        let b = alloc(&mut heap, 1);
        heap.get_mut(a).unwrap().items[0] = Value::Object(b);
        heap.get_mut(b).unwrap().items[0] = Value::Object(a);

        heap.collect([Value::Object(a)].iter());
        assert_eq!(heap.num_objects(), 2);

        heap.collect(std::iter::empty());
        assert_eq!(heap.num_objects(), 0);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut heap = Heap::default();
        let first = alloc(&mut heap, 0);
        heap.collect(std::iter::empty());
        let second = alloc(&mut heap, 0);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert_eq!(heap.live_refs().collect::<Vec<_>>(), vec![second]);
    }

    #[test]
    fn test_stale_ref_does_not_alias_reused_slot() {
        let mut heap = Heap::default();
        let stale = alloc(&mut heap, 1);
        heap.collect(std::iter::empty());

        let fresh = alloc(&mut heap, 2);
        heap.get_mut(fresh).unwrap().items[0] = Value::Int(42);
        assert!(!heap.contains(stale));
        assert!(heap.get(stale).is_none());
        assert!(heap.get_mut(stale).is_none());
        assert_eq!(heap.get(fresh).unwrap().items[0], Value::Int(42));
    }

    #[test]
    fn test_zero_headroom_keeps_threshold_positive() {
        let mut heap = Heap::new(1, 0);
        heap.collect(std::iter::empty());
        assert_eq!(heap.max_objects(), 1);
        alloc(&mut heap, 0);
        assert!(heap.num_objects() <= heap.max_objects());
        assert!(heap.needs_collection());
    }

    #[test]
    fn test_oversized_array_is_refused() {
        let mut heap = Heap::default();
        assert_eq!(heap.alloc_array(usize::MAX), None);
        assert_eq!(heap.num_objects(), 0);
    }

    #[test]
    fn test_needs_collection_at_threshold() {
        let mut heap = Heap::new(2, 8);
        alloc(&mut heap, 0);
        assert!(!heap.needs_collection());
        alloc(&mut heap, 0);
        assert!(heap.needs_collection());
    }
}

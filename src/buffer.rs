use crate::dtype::DType;
use crate::numeric_tensor::{Element, NumericTensor, NumericTensorError, StorageProvider, TypedStorage};
use crate::value::Value;
use log::trace;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Retained free buffers per dtype. Older entries are dropped past this.
const MAX_POOLED_PER_DTYPE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("Allocating {requested} bytes with {live} bytes live exceeds the budget of {budget} bytes")]
    BudgetExceeded { requested: usize, live: usize, budget: usize },
    #[error("Size of a {dtype} tensor of shape {shape:?} overflows the address space")]
    SizeOverflow { shape: Vec<usize>, dtype: DType },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub allocations: usize,
    pub reuse_hits: usize,
    pub pooled_bytes: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    stats: BufferStats,
    free: HashMap<DType, Vec<TypedStorage>>,
}

impl PoolState {
    fn check_budget(&self, budget: Option<usize>, requested: usize) -> Result<(), AllocationError> {
        match budget {
            Some(budget) if self.stats.live_bytes.saturating_add(requested) > budget => Err(AllocationError::BudgetExceeded {
                requested,
                live: self.stats.live_bytes,
                budget,
            }),
            _ => Ok(()),
        }
    }

    /// Smallest pooled buffer of `dtype` able to hold `len` elements.
    fn take_best_fit(&mut self, dtype: DType, len: usize) -> Option<TypedStorage> {
        let list = self.free.get_mut(&dtype)?;
        let (index, _) = list
            .iter()
            .enumerate()
            .filter(|(_, s)| s.capacity() >= len)
            .min_by_key(|(_, s)| s.capacity())?;
        let storage = list.swap_remove(index);
        self.stats.pooled_bytes -= storage.capacity_bytes();
        Some(storage)
    }

    fn give_back(&mut self, storage: TypedStorage) {
        let bytes = storage.capacity_bytes();
        if bytes == 0 {
            return;
        }
        let list = self.free.entry(storage.dtype()).or_default();
        if list.len() >= MAX_POOLED_PER_DTYPE {
            let dropped = list.remove(0);
            self.stats.pooled_bytes -= dropped.capacity_bytes();
        }
        list.push(storage);
        self.stats.pooled_bytes += bytes;
    }
}

/// Accounts live tensor bytes against an optional budget and recycles storage of released
/// tensors. Storage is only recycled when the released handle is its sole owner, so a buffer
/// that is still reachable elsewhere is never handed out again.
#[derive(Debug, Default)]
pub struct BufferManager {
    budget: Option<usize>,
    state: Mutex<PoolState>,
}

impl BufferManager {
    pub fn new(budget: Option<usize>) -> Self {
        Self {
            budget,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn budget(&self) -> Option<usize> {
        self.budget
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A zero-filled vector of `len` elements, recycled from the pool when possible.
    pub fn allocate_vec<T: Element>(&self, len: usize) -> Result<Vec<T>, AllocationError> {
        let requested = len.checked_mul(T::DTYPE.size()).ok_or_else(|| AllocationError::SizeOverflow {
            shape: vec![len],
            dtype: T::DTYPE,
        })?;
        let mut state = self.lock();
        state.check_budget(self.budget, requested)?;
        state.stats.allocations += 1;
        let recycled = state
            .take_best_fit(T::DTYPE, len)
            .and_then(|storage| T::from_storage(storage).ok());
        match recycled {
            Some(mut values) => {
                state.stats.reuse_hits += 1;
                trace!("Reusing pooled {} buffer of capacity {} for {len} elements", T::DTYPE, values.capacity());
                values.clear();
                values.resize(len, T::default());
                Ok(values)
            }
            None => Ok(vec![T::default(); len]),
        }
    }

    pub fn allocate(&self, shape: &[usize], dtype: DType) -> Result<NumericTensor, NumericTensorError> {
        NumericTensor::zeros(shape, dtype, self)
    }

    /// Accounts a value that has become live.
    pub fn track(&self, value: &Value) -> Result<(), AllocationError> {
        let bytes = value.size_bytes();
        let mut state = self.lock();
        state.check_budget(self.budget, bytes)?;
        state.stats.live_bytes += bytes;
        state.stats.peak_bytes = state.stats.peak_bytes.max(state.stats.live_bytes);
        Ok(())
    }

    /// Ends the accounting of a tracked value and pools its storage if nothing else holds it.
    pub fn release(&self, value: Value) {
        let bytes = value.size_bytes();
        let mut storages = Vec::new();
        collect_storage(value, &mut storages);
        let mut state = self.lock();
        state.stats.live_bytes = state.stats.live_bytes.saturating_sub(bytes);
        for storage in storages {
            state.give_back(storage);
        }
    }

    /// Ends the accounting of a value that leaves the run, such as a graph output handed to the
    /// caller. Its storage is not pooled.
    pub fn untrack(&self, value: &Value) {
        let bytes = value.size_bytes();
        let mut state = self.lock();
        state.stats.live_bytes = state.stats.live_bytes.saturating_sub(bytes);
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }
}

fn collect_storage(value: Value, out: &mut Vec<TypedStorage>) {
    match value {
        Value::Tensor(t) => out.extend(t.into_storage()),
        Value::Sequence(s) => {
            for item in s.items().iter().cloned() {
                out.extend(item.into_storage());
            }
        }
        Value::Optional(Some(inner)) => collect_storage(*inner, out),
        Value::Optional(None) => {}
    }
}

impl StorageProvider for BufferManager {
    fn zeroed<T: Element>(&self, len: usize) -> Result<Vec<T>, AllocationError> {
        self.allocate_vec::<T>(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_unique_storage_is_reused() {
        let buffers = BufferManager::new(None);
        let a = buffers.allocate(&[4, 4], DType::F32).unwrap();
        buffers.track(&Value::Tensor(a.clone())).unwrap();
        buffers.release(Value::Tensor(a));
        let stats = buffers.stats();
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.peak_bytes, 64);
        assert_eq!(stats.pooled_bytes, 64);

        let b = buffers.allocate(&[2, 2], DType::F32).unwrap();
        assert_eq!(b.to_vec::<f32>().unwrap(), vec![0.0; 4]);
        assert_eq!(buffers.stats().reuse_hits, 1);
    }

    #[test]
    fn shared_storage_is_not_pooled() {
        let buffers = BufferManager::new(None);
        let a = buffers.allocate(&[8], DType::I64).unwrap();
        let still_held = a.clone();
        buffers.release(Value::Tensor(a));
        assert_eq!(buffers.stats().pooled_bytes, 0);
        let _b = buffers.allocate(&[8], DType::I64).unwrap();
        assert_eq!(buffers.stats().reuse_hits, 0);
        assert_eq!(still_held.num_elements(), 8);
    }

    #[test]
    fn pooled_storage_is_per_dtype() {
        let buffers = BufferManager::new(None);
        let a = buffers.allocate(&[8], DType::F64).unwrap();
        buffers.release(Value::Tensor(a));
        let _b = buffers.allocate(&[8], DType::F32).unwrap();
        assert_eq!(buffers.stats().reuse_hits, 0);
    }

    #[test]
    fn budget_is_enforced() {
        let buffers = BufferManager::new(Some(32));
        let a = buffers.allocate(&[4], DType::F32).unwrap();
        buffers.track(&Value::Tensor(a)).unwrap();
        assert!(buffers.allocate(&[4], DType::F32).is_ok());
        let err = buffers.allocate_vec::<f64>(4).unwrap_err();
        assert_eq!(
            err,
            AllocationError::BudgetExceeded {
                requested: 32,
                live: 16,
                budget: 32
            }
        );
    }

    #[test]
    fn oversized_request_overflows_instead_of_panicking() {
        let buffers = BufferManager::new(Some(1 << 20));
        let err = buffers.allocate(&[1 << 32, 1 << 32], DType::F32).unwrap_err();
        assert!(matches!(
            err,
            NumericTensorError::Allocation(AllocationError::SizeOverflow { dtype: DType::F32, .. })
        ));
        assert!(matches!(
            buffers.allocate_vec::<f64>(usize::MAX / 2),
            Err(AllocationError::SizeOverflow { .. })
        ));
        assert_eq!(buffers.stats().allocations, 0);
    }
}

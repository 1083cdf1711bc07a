
use crate::nn::pool::{ParamId, ParamPool, PoolHandle};
use crate::tensor::Tensor;

/// 用中心差分估计`loss_fn`对参数`id`的梯度
pub(super) fn numeric_grad<F>(pool: &PoolHandle, id: ParamId, loss_fn: F) -> Tensor
where
    F: Fn(&PoolHandle) -> f32,
{
    let eps = 1e-2;
    let original = pool.borrow().value(id).clone();
    let mut grad = Tensor::zeros_like(&original);
    for i in 0..original.size() {
        let mut plus = original.clone();
        plus.data_as_slice_mut()[i] += eps;
        pool.borrow_mut().assign(id, &plus).unwrap();
        let loss_plus = loss_fn(pool);

        let mut minus = original.clone();
        minus.data_as_slice_mut()[i] -= eps;
        pool.borrow_mut().assign(id, &minus).unwrap();
        let loss_minus = loss_fn(pool);

        grad.data_as_slice_mut()[i] = (loss_plus - loss_minus) / (2. * eps);
    }
    pool.borrow_mut().assign(id, &original).unwrap();
    grad
}

pub(super) fn seeded_pool(seed: u64) -> ParamPool {
    ParamPool::new(Some(seed))
}

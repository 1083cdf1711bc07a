/*
 * @Description  : 梯度裁剪
 */

use crate::errors::NasError;
use crate::nn::pool::{ParamId, PoolHandle};

/// 按全局L2范数裁剪梯度：范数超过`max_norm`时，所有梯度等比例缩放到`max_norm`。
/// 没有梯度的参数不参与计算。返回裁剪前的全局范数
pub fn clip_grad_norm(
    pool: &PoolHandle,
    params: &[ParamId],
    max_norm: f32,
) -> Result<f32, NasError> {
    let mut pool = pool.borrow_mut();
    let total_norm = params
        .iter()
        .filter_map(|&id| pool.grad(id))
        .map(|g| g.sum_squares())
        .sum::<f32>()
        .sqrt();
    let clip_coef = max_norm / (total_norm + 1e-6);
    if clip_coef < 1. {
        for &id in params {
            if let Some(grad) = pool.grad(id) {
                let clipped = grad * clip_coef;
                pool.set_grad(id, Some(clipped))?;
            }
        }
    }
    Ok(total_norm)
}

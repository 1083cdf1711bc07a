/*
 * @Description  : SGD (随机梯度下降) 优化器，可选动量与权重衰减
 */

use super::Optimizer;
use crate::errors::NasError;
use crate::nn::pool::{ParamId, PoolHandle};
use crate::tensor::Tensor;
use std::collections::HashMap;

/// SGD 优化器
///
/// - g = ∇θ + λ * θ
/// - v = μ * v + g（μ 为 0 时不保存动量）
/// - θ = θ - α * v
pub struct SGD {
    pool: PoolHandle,
    params: Vec<ParamId>,
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: HashMap<ParamId, Tensor>,
}

impl SGD {
    pub fn new(pool: &PoolHandle, params: Vec<ParamId>, lr: f32) -> Self {
        Self::with_config(pool, params, lr, 0., 0.)
    }

    pub fn with_config(
        pool: &PoolHandle,
        params: Vec<ParamId>,
        lr: f32,
        momentum: f32,
        weight_decay: f32,
    ) -> Self {
        Self {
            pool: pool.clone(),
            params,
            lr,
            momentum,
            weight_decay,
            velocity: HashMap::new(),
        }
    }

    pub fn params(&self) -> &[ParamId] {
        &self.params
    }
}

impl Optimizer for SGD {
    fn zero_grad(&mut self) {
        self.pool.borrow_mut().zero_grad(self.params.iter().copied());
    }

    fn step(&mut self) -> Result<(), NasError> {
        let mut pool = self.pool.borrow_mut();
        for &id in &self.params {
            let Some(grad) = pool.grad(id) else {
                continue;
            };
            let mut update = grad.clone();
            if self.weight_decay != 0. {
                update += &(pool.value(id) * self.weight_decay);
            }
            if self.momentum != 0. {
                let v = self
                    .velocity
                    .entry(id)
                    .or_insert_with(|| Tensor::zeros(update.shape()));
                v.map_inplace(|x| x * self.momentum);
                *v += &update;
                update = v.clone();
            }
            let new_value = pool.value(id) - &(&update * self.lr);
            pool.assign(id, &new_value)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset(&mut self) {
        self.velocity.clear();
    }
}

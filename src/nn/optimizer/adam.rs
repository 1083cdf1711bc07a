/*
 * @Description  : Adam 优化器
 */

use super::Optimizer;
use crate::errors::NasError;
use crate::nn::pool::{ParamId, PoolHandle};
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Adam: Adaptive Moment Estimation
/// - m = β1 * m + (1 - β1) * g
/// - v = β2 * v + (1 - β2) * g²
/// - θ = θ - α * m_hat / (√v_hat + ε)
pub struct Adam {
    pool: PoolHandle,
    params: Vec<ParamId>,
    lr: f32,
    /// β1 (一阶矩衰减)
    beta1: f32,
    /// β2 (二阶矩衰减)
    beta2: f32,
    /// 数值稳定项
    epsilon: f32,
    /// 一阶矩估计
    m: HashMap<ParamId, Tensor>,
    /// 二阶矩估计
    v: HashMap<ParamId, Tensor>,
    /// 时间步
    t: usize,
}

impl Adam {
    pub fn new(pool: &PoolHandle, params: Vec<ParamId>, lr: f32) -> Self {
        Self::with_config(pool, params, lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_config(
        pool: &PoolHandle,
        params: Vec<ParamId>,
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Self {
        Self {
            pool: pool.clone(),
            params,
            lr,
            beta1,
            beta2,
            epsilon,
            m: HashMap::new(),
            v: HashMap::new(),
            t: 0,
        }
    }
}

impl Optimizer for Adam {
    fn zero_grad(&mut self) {
        self.pool.borrow_mut().zero_grad(self.params.iter().copied());
    }

    fn step(&mut self) -> Result<(), NasError> {
        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);
        let mut pool = self.pool.borrow_mut();

        for &id in &self.params {
            let Some(grad) = pool.grad(id) else {
                continue;
            };
            let g = grad.data_as_slice();

            // 更新一阶矩
            let m = self
                .m
                .entry(id)
                .or_insert_with(|| Tensor::zeros(grad.shape()));
            m.data_as_slice_mut()
                .iter_mut()
                .zip(g)
                .for_each(|(m, g)| *m = self.beta1 * *m + (1.0 - self.beta1) * g);

            // 更新二阶矩
            let v = self
                .v
                .entry(id)
                .or_insert_with(|| Tensor::zeros(grad.shape()));
            v.data_as_slice_mut()
                .iter_mut()
                .zip(g)
                .for_each(|(v, g)| *v = self.beta2 * *v + (1.0 - self.beta2) * g * g);

            // 偏差修正后更新参数
            let mut new_value = pool.value(id).clone();
            new_value
                .data_as_slice_mut()
                .iter_mut()
                .zip(m.data_as_slice().iter().zip(v.data_as_slice()))
                .for_each(|(theta, (m, v))| {
                    let m_hat = m / bias_correction1;
                    let v_hat = v / bias_correction2;
                    *theta -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
                });
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
        self.m.clear();
        self.v.clear();
        self.t = 0;
    }
}

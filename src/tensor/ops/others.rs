use crate::errors::{Operator, TensorError};
use crate::tensor::Tensor;
use std::cmp::PartialEq;

impl From<f32> for Tensor {
    /// 实现 From<f32> trait 用于将`f32`类型转换为形状为`[1]`的张量
    fn from(scalar: f32) -> Self {
        Self::new(&[scalar], &[1])
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Tensor {
    /// 对张量中的所有元素求和，返回纯数
    pub fn sum(&self) -> f32 {
        self.data.sum()
    }

    /// 所有元素的平均值；空张量返回0
    pub fn mean(&self) -> f32 {
        if self.size() == 0 {
            0.
        } else {
            self.sum() / self.size() as f32
        }
    }

    /// 所有元素的平方和（梯度范数裁剪时使用）
    pub fn sum_squares(&self) -> f32 {
        self.data.iter().map(|x| x * x).sum()
    }

    /// 逐元素映射，返回新的张量
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Self {
        Self::from_array(self.data.mapv(f))
    }

    /// 逐元素原地映射
    pub fn map_inplace<F: Fn(f32) -> f32>(&mut self, f: F) {
        self.data.mapv_inplace(f);
    }

    pub fn relu(&self) -> Self {
        self.map(|x| x.max(0.))
    }

    /// 按行（第0维）取最大值所在的列下标，仅适用于2阶张量`[N, K]`
    pub fn argmax_rows(&self) -> Result<Vec<usize>, TensorError> {
        if self.dimension() != 2 {
            return Err(TensorError::IncompatibleShape);
        }
        let cols = self.shape()[1];
        Ok(self
            .data_as_slice()
            .chunks(cols.max(1))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(best_i, best), (i, &v)| {
                        if v > best { (i, v) } else { (best_i, best) }
                    })
                    .0
            })
            .collect())
    }

    /// 把`src`的值原地拷贝进本张量（保持本张量的身份不变），形状须严格一致
    pub fn copy_from(&mut self, src: &Self) -> Result<(), TensorError> {
        if !self.is_same_shape(src) {
            return Err(TensorError::OperatorError {
                operator: Operator::CopyFrom,
                tensor1_shape: self.shape().to_vec(),
                tensor2_shape: src.shape().to_vec(),
            });
        }
        self.data.assign(&src.data);
        Ok(())
    }
}

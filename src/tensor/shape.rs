use super::Tensor;
use crate::errors::{Operator, TensorError};
use ndarray::{Axis, Slice};

impl Tensor {
    /// 变形，元素总数必须保持不变
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, TensorError> {
        let new_total_elements: usize = shape.iter().product();
        if self.size() != new_total_elements {
            return Err(TensorError::IncompatibleShape);
        }
        Ok(Self::from_vec(self.to_vec(), shape))
    }

    /// 沿`axis`维拼接多个张量，除`axis`维外其余各维须一致
    pub fn concat(tensors: &[&Self], axis: usize) -> Result<Self, TensorError> {
        let first = tensors.first().ok_or(TensorError::EmptyList)?;
        if axis >= first.dimension() {
            return Err(TensorError::AxisOutOfRange {
                axis,
                dimension: first.dimension(),
            });
        }
        for t in &tensors[1..] {
            let compatible = t.dimension() == first.dimension()
                && t
                    .shape()
                    .iter()
                    .zip(first.shape())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(TensorError::OperatorError {
                    operator: Operator::Concat,
                    tensor1_shape: first.shape().to_vec(),
                    tensor2_shape: t.shape().to_vec(),
                });
            }
        }

        let views = tensors.iter().map(|t| t.data.view()).collect::<Vec<_>>();
        let data = ndarray::concatenate(Axis(axis), &views)
            .map_err(|_| TensorError::InconsistentShape)?;
        Ok(Self::from_array(data))
    }

    /// 取`axis`维上的区间`[start, start + len)`，返回新的张量
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Self, TensorError> {
        if axis >= self.dimension() {
            return Err(TensorError::AxisOutOfRange {
                axis,
                dimension: self.dimension(),
            });
        }
        let axis_len = self.shape()[axis];
        if start + len > axis_len {
            return Err(TensorError::RangeOutOfBounds {
                axis,
                start,
                end: start + len,
                len: axis_len,
            });
        }
        let view = self
            .data
            .slice_axis(Axis(axis), Slice::from(start..start + len));
        Ok(Self::from_array(view.to_owned()))
    }

    /// 按下标挑选第0维上的若干行（可重复、可乱序）
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self, TensorError> {
        if self.dimension() == 0 {
            return Err(TensorError::AxisOutOfRange {
                axis: 0,
                dimension: 0,
            });
        }
        let len = self.shape()[0];
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(TensorError::RangeOutOfBounds {
                axis: 0,
                start: bad,
                end: bad + 1,
                len,
            });
        }
        Ok(Self::from_array(self.data.select(Axis(0), indices)))
    }

    /// 沿批维（第0维）切成至多`chunks`份，各份大小为`ceil(N / chunks)`，最后一份可能偏小。
    /// 样本数少于`chunks`时份数随之减少（不会产生空批）
    pub fn split_batch(&self, chunks: usize) -> Result<Vec<Self>, TensorError> {
        if self.dimension() == 0 {
            return Err(TensorError::AxisOutOfRange {
                axis: 0,
                dimension: 0,
            });
        }
        let batch = self.shape()[0];
        let chunks = chunks.max(1);
        let chunk_size = batch.div_ceil(chunks).max(1);
        let mut parts = Vec::with_capacity(chunks);
        let mut start = 0;
        while start < batch {
            let len = chunk_size.min(batch - start);
            parts.push(self.narrow(0, start, len)?);
            start += len;
        }
        Ok(parts)
    }
}

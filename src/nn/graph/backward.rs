/*
 * @Description  : 反向传播：从损失节点出发，按节点创建的逆序传播梯度，
 *                 参数节点上的梯度累加回参数池
 */

use super::{Graph, NodeId, Op, kernels};
use crate::errors::NasError;
use crate::tensor::Tensor;

impl Graph {
    /// 以`loss`（须为单元素）为起点做反向传播，返回损失值。
    /// 梯度累加（而非覆盖）到参数池中，清零由调用方负责
    pub fn backward(&self, loss: NodeId) -> Result<f32, NasError> {
        if !self.grad_enabled {
            return Err(NasError::Computation(
                "计算图未记录梯度（no_grad），无法反向传播".to_string(),
            ));
        }
        let loss_value = self
            .value(loss)
            .number()
            .ok_or_else(|| {
                NasError::Computation(format!(
                    "反向传播的起点必须是单元素张量，实际形状为{:?}",
                    self.value(loss).shape()
                ))
            })?;

        let mut grads: Vec<Option<Tensor>> = vec![None; loss.0 + 1];
        grads[loss.0] = Some(Tensor::ones(self.value(loss).shape()));

        for index in (0..=loss.0).rev() {
            let Some(grad) = grads[index].take() else {
                continue;
            };
            for (parent, parent_grad) in self.local_grads(index, &grad)? {
                match &mut grads[parent.0] {
                    Some(existing) => *existing += &parent_grad,
                    slot @ None => *slot = Some(parent_grad),
                }
            }
        }
        Ok(loss_value)
    }

    /// 某个节点对其各父节点的向量-雅可比积；参数节点在此处把梯度写回参数池
    fn local_grads(&self, index: usize, grad: &Tensor) -> Result<Vec<(NodeId, Tensor)>, NasError> {
        let node = &self.nodes[index];
        let grads = match &node.op {
            Op::Leaf => Vec::new(),
            Op::Param(id) => {
                self.pool.borrow_mut().accumulate_grad(*id, grad)?;
                Vec::new()
            }
            Op::Sum(parents) => parents.iter().map(|p| (*p, grad.clone())).collect(),
            Op::Concat { parents, axis } => {
                let mut offset = 0;
                let mut grads = Vec::with_capacity(parents.len());
                for p in parents {
                    let len = self.value(*p).shape()[*axis];
                    grads.push((*p, grad.narrow(*axis, offset, len)?));
                    offset += len;
                }
                grads
            }
            Op::Relu(x) => {
                let mask = self.value(*x).map(|v| if v > 0. { 1. } else { 0. });
                vec![(*x, grad * &mask)]
            }
            Op::Conv1x1 { x, weight } => {
                let (dx, dw) = kernels::conv1x1_backward(self.value(*x), self.value(*weight), grad);
                vec![(*x, dx), (*weight, dw)]
            }
            Op::BatchNorm {
                x,
                weight,
                bias,
                x_hat,
                inv_std,
                batch_stats,
            } => {
                let gamma = weight.map(|w| self.value(w));
                let (dx, d_gamma, d_beta) =
                    kernels::batch_norm_backward(grad, x_hat, inv_std, gamma, *batch_stats);
                let channels = d_gamma.len();
                let mut grads = vec![(*x, dx)];
                if let Some(w) = weight {
                    grads.push((*w, Tensor::from_vec(d_gamma, &[channels])));
                }
                if let Some(b) = bias {
                    grads.push((*b, Tensor::from_vec(d_beta, &[channels])));
                }
                grads
            }
            Op::AvgPool3x3(x) => vec![(*x, kernels::avg_pool_3x3_backward(grad))],
            Op::GlobalAvgPool(x) => {
                let shape = self.value(*x).shape();
                vec![(*x, kernels::global_avg_pool_backward(grad, shape))]
            }
            Op::Linear { x, weight, bias } => {
                let (dx, dw, db) = kernels::linear_backward(self.value(*x), self.value(*weight), grad);
                let mut grads = vec![(*x, dx), (*weight, dw)];
                if let Some(b) = bias {
                    grads.push((*b, db));
                }
                grads
            }
            Op::SoftmaxCrossEntropy {
                logits,
                probs,
                labels,
            } => {
                let upstream = grad.data_as_slice()[0];
                let classes = probs.shape()[1];
                let scale = upstream / labels.len().max(1) as f32;
                let mut d = probs.to_vec();
                for (row, &label) in labels.iter().enumerate() {
                    d[row * classes + label] -= 1.;
                }
                d.iter_mut().for_each(|v| *v *= scale);
                vec![(*logits, Tensor::from_vec(d, probs.shape()))]
            }
            Op::MseLoss { pred, diff } => {
                let upstream = grad.data_as_slice()[0];
                let scale = 2. * upstream / diff.size().max(1) as f32;
                vec![(*pred, diff * scale)]
            }
        };
        Ok(grads)
    }
}

/*
 * @Description  : 计算图（Graph）：按运行定义（define-by-run）的反向自动微分
 *
 * 每次前向计算都新建一张图：节点按创建顺序追加，天然是拓扑序；
 * 参数节点只是参数池中张量的一份取值快照，反向传播时梯度按`ParamId`累加回参数池。
 *
 * 图上有两个独立的开关：
 * - `is_train`：决定BN等层用批统计量（并更新滑动统计缓冲区）还是用缓冲区中的统计量；
 * - `grad_enabled`：关闭时不记录任何父子关系（等价于 no_grad），`backward`会直接报错。
 *
 * 训练模式下可以临时关闭滑动统计缓冲区的更新（`set_update_running_stats`），
 * 数据并行时只有第一个副本更新缓冲区。
 */

mod backward;
mod kernels;

#[cfg(test)]
mod tests;

use super::pool::{ParamId, PoolHandle};
use crate::errors::NasError;
use crate::tensor::Tensor;
use std::collections::HashMap;

/// 图中节点的标识（仅在所属的那张图内有效）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// 节点的来源运算，保存反向传播所需的全部信息
enum Op {
    /// 输入、常量，以及关闭梯度时记录的任何节点
    Leaf,
    Param(ParamId),
    Sum(Vec<NodeId>),
    Concat {
        parents: Vec<NodeId>,
        axis: usize,
    },
    Relu(NodeId),
    Conv1x1 {
        x: NodeId,
        weight: NodeId,
    },
    BatchNorm {
        x: NodeId,
        weight: Option<NodeId>,
        bias: Option<NodeId>,
        x_hat: Tensor,
        inv_std: Vec<f32>,
        batch_stats: bool,
    },
    AvgPool3x3(NodeId),
    GlobalAvgPool(NodeId),
    Linear {
        x: NodeId,
        weight: NodeId,
        bias: Option<NodeId>,
    },
    SoftmaxCrossEntropy {
        logits: NodeId,
        probs: Tensor,
        labels: Vec<usize>,
    },
    MseLoss {
        pred: NodeId,
        diff: Tensor,
    },
}

struct Node {
    value: Tensor,
    op: Op,
}

/// BN层在参数池中的成员及超参数
#[derive(Debug, Clone, Copy)]
pub struct BatchNormSpec {
    pub weight: Option<ParamId>,
    pub bias: Option<ParamId>,
    pub running_mean: ParamId,
    pub running_var: ParamId,
    pub momentum: f32,
    pub eps: f32,
}

/// 计算图
pub struct Graph {
    pool: PoolHandle,
    nodes: Vec<Node>,
    /// 同一参数在一张图中只取一次值
    param_nodes: HashMap<ParamId, NodeId>,
    is_train: bool,
    grad_enabled: bool,
    update_running_stats: bool,
}

impl Graph {
    pub fn new(pool: PoolHandle, is_train: bool, grad_enabled: bool) -> Self {
        Self {
            pool,
            nodes: Vec::new(),
            param_nodes: HashMap::new(),
            is_train,
            grad_enabled,
            update_running_stats: true,
        }
    }

    pub const fn is_train(&self) -> bool {
        self.is_train
    }

    pub const fn is_grad_enabled(&self) -> bool {
        self.grad_enabled
    }

    pub const fn is_updating_running_stats(&self) -> bool {
        self.update_running_stats
    }

    /// 训练模式下BN是否更新参数池中的滑动统计缓冲区（不影响批统计量的使用）
    pub fn set_update_running_stats(&mut self, update: bool) {
        self.update_running_stats = update;
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 节点的值
    ///
    /// # Panics
    /// `id`不属于本图时
    pub fn value(&self, id: NodeId) -> &Tensor {
        &self.nodes[id.0].value
    }

    fn push(&mut self, value: Tensor, op: Op) -> NodeId {
        let op = if self.grad_enabled { op } else { Op::Leaf };
        self.nodes.push(Node { value, op });
        NodeId(self.nodes.len() - 1)
    }

    // ========== 叶子节点 ==========

    /// 输入/常量节点（不接收梯度）
    pub fn input(&mut self, value: &Tensor) -> NodeId {
        self.push(value.clone(), Op::Leaf)
    }

    /// 参数池中某个张量的节点
    pub fn param(&mut self, id: ParamId) -> NodeId {
        if let Some(&node) = self.param_nodes.get(&id) {
            return node;
        }
        let value = self.pool.borrow().value(id).clone();
        let node = self.push(value, Op::Param(id));
        self.param_nodes.insert(id, node);
        node
    }

    /// 与`x`同形的全零常量节点
    pub fn zeros_like(&mut self, x: NodeId) -> NodeId {
        let value = Tensor::zeros_like(self.value(x));
        self.push(value, Op::Leaf)
    }

    // ========== 逐元素运算 ==========

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, NasError> {
        self.sum(&[a, b])
    }

    /// 多个同形节点求和
    pub fn sum(&mut self, parents: &[NodeId]) -> Result<NodeId, NasError> {
        let (first, rest) = parents
            .split_first()
            .ok_or_else(|| NasError::Computation("求和至少需要1个节点".to_string()))?;
        let mut value = self.value(*first).clone();
        for p in rest {
            let other = self.value(*p);
            if !value.is_same_shape(other) {
                return Err(NasError::Computation(format!(
                    "求和的节点形状不一致：{:?} vs {:?}",
                    value.shape(),
                    other.shape()
                )));
            }
            value += other;
        }
        Ok(self.push(value, Op::Sum(parents.to_vec())))
    }

    pub fn relu(&mut self, x: NodeId) -> NodeId {
        let value = self.value(x).relu();
        self.push(value, Op::Relu(x))
    }

    /// 沿`axis`维拼接
    pub fn concat(&mut self, parents: &[NodeId], axis: usize) -> Result<NodeId, NasError> {
        let value = {
            let values = parents.iter().map(|p| self.value(*p)).collect::<Vec<_>>();
            Tensor::concat(&values, axis)?
        };
        Ok(self.push(
            value,
            Op::Concat {
                parents: parents.to_vec(),
                axis,
            },
        ))
    }

    // ========== 层运算 ==========

    /// 1x1卷积（无偏置）：`x`为`[N, C_in, H, W]`，权重为`[C_out, C_in]`
    pub fn conv1x1(&mut self, x: NodeId, weight: ParamId) -> Result<NodeId, NasError> {
        let weight = self.param(weight);
        let value = kernels::conv1x1_forward(self.value(x), self.value(weight))?;
        Ok(self.push(value, Op::Conv1x1 { x, weight }))
    }

    /// 2D批归一化。训练模式下使用批统计量，并原地更新参数池中的滑动统计缓冲区；
    /// 评估模式下使用缓冲区中的统计量
    pub fn batch_norm(&mut self, x: NodeId, spec: &BatchNormSpec) -> Result<NodeId, NasError> {
        let weight = spec.weight.map(|id| self.param(id));
        let bias = spec.bias.map(|id| self.param(id));

        let (mean, var) = if self.is_train {
            let (mean, var) = kernels::channel_stats(self.value(x))?;
            let shape = self.value(x).shape();
            let m = (shape[0] * shape[2] * shape[3]) as f32;
            let unbiased = if m > 1. { m / (m - 1.) } else { 1. };
            if self.update_running_stats {
                let mut pool = self.pool.borrow_mut();
                let momentum = spec.momentum;
                pool.value_mut(spec.running_mean)
                    .data_as_slice_mut()
                    .iter_mut()
                    .zip(&mean)
                    .for_each(|(r, v)| *r = (1. - momentum) * *r + momentum * v);
                pool.value_mut(spec.running_var)
                    .data_as_slice_mut()
                    .iter_mut()
                    .zip(&var)
                    .for_each(|(r, v)| *r = (1. - momentum) * *r + momentum * v * unbiased);
            }
            (mean, var)
        } else {
            let pool = self.pool.borrow();
            (
                pool.value(spec.running_mean).to_vec(),
                pool.value(spec.running_var).to_vec(),
            )
        };
        let inv_std = var
            .iter()
            .map(|v| 1. / (v + spec.eps).sqrt())
            .collect::<Vec<_>>();

        let (value, x_hat) = kernels::batch_norm_forward(
            self.value(x),
            &mean,
            &inv_std,
            weight.map(|w| self.value(w)),
            bias.map(|b| self.value(b)),
        )?;
        Ok(self.push(
            value,
            Op::BatchNorm {
                x,
                weight,
                bias,
                x_hat,
                inv_std,
                batch_stats: self.is_train,
            },
        ))
    }

    /// 3x3平均池化（步长1，填充1，填充不计入分母）
    pub fn avg_pool_3x3(&mut self, x: NodeId) -> Result<NodeId, NasError> {
        let value = kernels::avg_pool_3x3_forward(self.value(x))?;
        Ok(self.push(value, Op::AvgPool3x3(x)))
    }

    /// 全局平均池化：`[N, C, H, W]` -> `[N, C]`
    pub fn global_avg_pool(&mut self, x: NodeId) -> Result<NodeId, NasError> {
        let value = kernels::global_avg_pool_forward(self.value(x))?;
        Ok(self.push(value, Op::GlobalAvgPool(x)))
    }

    /// 全连接：`x`为`[N, in]`，权重为`[out, in]`，偏置为`[out]`
    pub fn linear(
        &mut self,
        x: NodeId,
        weight: ParamId,
        bias: Option<ParamId>,
    ) -> Result<NodeId, NasError> {
        let weight = self.param(weight);
        let bias = bias.map(|id| self.param(id));
        let value = kernels::linear_forward(
            self.value(x),
            self.value(weight),
            bias.map(|b| self.value(b)),
        )?;
        Ok(self.push(value, Op::Linear { x, weight, bias }))
    }

    // ========== 损失 ==========

    /// Softmax交叉熵（批内取平均），`target`为类别下标，形状`[N]`
    pub fn softmax_cross_entropy(
        &mut self,
        logits: NodeId,
        target: &Tensor,
    ) -> Result<NodeId, NasError> {
        let probs = kernels::softmax_rows(self.value(logits))?;
        let (batch, classes) = (probs.shape()[0], probs.shape()[1]);
        let labels = kernels::class_labels(target, batch, classes)?;
        let p = probs.data_as_slice();
        let loss = labels
            .iter()
            .enumerate()
            .map(|(row, &label)| -(p[row * classes + label].max(f32::MIN_POSITIVE)).ln())
            .sum::<f32>()
            / batch.max(1) as f32;
        Ok(self.push(
            Tensor::new(&[loss], &[1]),
            Op::SoftmaxCrossEntropy {
                logits,
                probs,
                labels,
            },
        ))
    }

    /// 均方误差
    pub fn mse_loss(&mut self, pred: NodeId, target: &Tensor) -> Result<NodeId, NasError> {
        let value = self.value(pred);
        if !value.is_same_shape(target) {
            return Err(NasError::Computation(format!(
                "均方误差的预测形状{:?}与目标形状{:?}不一致",
                value.shape(),
                target.shape()
            )));
        }
        let diff = value - target;
        let loss = diff.sum_squares() / diff.size().max(1) as f32;
        Ok(self.push(Tensor::new(&[loss], &[1]), Op::MseLoss { pred, diff }))
    }
}

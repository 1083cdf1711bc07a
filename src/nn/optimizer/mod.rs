/*
 * @Description  : 优化器模块，实现 PyTorch 风格的梯度优化算法
 */

mod adam;
mod clip;
mod sgd;


pub use adam::Adam;
pub use clip::clip_grad_norm;
pub use sgd::SGD;

use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};

/// Optimizer trait（PyTorch 风格）
///
/// # 设计要点
/// - Optimizer 绑定参数池中的一组参数（通过`ParamId`）
/// - `Graph::backward()` 把梯度累加进参数池
/// - `step()` 只更新 Optimizer 绑定的参数，没有梯度的参数保持不变
///
/// # 使用示例
/// ```ignore
/// let mut optimizer = SGD::new(&pool, ids, 0.01);
///
/// optimizer.zero_grad();
/// let loss = criterion.loss(&mut graph, logits, &target)?;
/// graph.backward(loss)?;
/// optimizer.step()?;
/// ```
pub trait Optimizer {
    /// 清零所有参数的梯度
    fn zero_grad(&mut self);

    /// 更新参数（只更新 Optimizer 绑定的参数）
    fn step(&mut self) -> Result<(), NasError>;

    /// 一步完成：zero_grad + backward + step
    ///
    /// # 返回
    /// loss 的标量值
    fn minimize(&mut self, graph: &Graph, loss: NodeId) -> Result<f32, NasError> {
        self.zero_grad();
        let loss_val = graph.backward(loss)?;
        self.step()?;
        Ok(loss_val)
    }

    /// 获取学习率
    fn learning_rate(&self) -> f32;

    /// 设置学习率
    fn set_learning_rate(&mut self, lr: f32);

    /// 重置累积状态（如 Adam 的动量）
    fn reset(&mut self);
}

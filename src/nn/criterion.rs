/*
 * @Description  : 损失函数与评估指标
 *
 * `Criterion` 在计算图上构建损失节点（可反向传播）；
 * `Metric` 只对张量求值，用于评估队列上的逐批指标。
 * 同一个结构体可以同时实现两者，例如交叉熵既能作为训练损失，也能作为评估指标。
 *
 * ```ignore
 * let criterion = CrossEntropyLoss;
 * let mut graph = candidate.new_graph(true);
 * let logits = candidate.forward(&mut graph, &inputs, false)?;
 * let loss = criterion.loss(&mut graph, logits, &targets)?;
 * graph.backward(loss)?;
 * ```
 */

use super::graph::{Graph, NodeId};
use crate::errors::NasError;
use crate::nn::pool::ParamPool;
use crate::tensor::Tensor;

/// 训练损失
pub trait Criterion {
    fn loss(&self, graph: &mut Graph, output: NodeId, target: &Tensor) -> Result<NodeId, NasError>;
}

/// 评估指标：由一批输出与目标得到一个标量
pub trait Metric {
    fn evaluate(&self, output: &Tensor, target: &Tensor) -> Result<f32, NasError>;
}

impl<F> Metric for F
where
    F: Fn(&Tensor, &Tensor) -> f32,
{
    fn evaluate(&self, output: &Tensor, target: &Tensor) -> Result<f32, NasError> {
        Ok(self(output, target))
    }
}

// ==================== CrossEntropyLoss ====================

/// 交叉熵损失函数，内置 Softmax，适用于多分类任务。
/// 目标为类别下标，形状`[batch_size]`
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl Criterion for CrossEntropyLoss {
    fn loss(&self, graph: &mut Graph, output: NodeId, target: &Tensor) -> Result<NodeId, NasError> {
        graph.softmax_cross_entropy(output, target)
    }
}

impl Metric for CrossEntropyLoss {
    fn evaluate(&self, output: &Tensor, target: &Tensor) -> Result<f32, NasError> {
        scalar_on_scratch_graph(|graph| {
            let logits = graph.input(output);
            graph.softmax_cross_entropy(logits, target)
        })
    }
}

// ==================== MseLoss ====================

/// 均方误差损失，适用于回归任务
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl Criterion for MseLoss {
    fn loss(&self, graph: &mut Graph, output: NodeId, target: &Tensor) -> Result<NodeId, NasError> {
        graph.mse_loss(output, target)
    }
}

impl Metric for MseLoss {
    fn evaluate(&self, output: &Tensor, target: &Tensor) -> Result<f32, NasError> {
        scalar_on_scratch_graph(|graph| {
            let pred = graph.input(output);
            graph.mse_loss(pred, target)
        })
    }
}

// ==================== Accuracy ====================

/// 分类准确率（top-1）
#[derive(Debug, Clone, Copy, Default)]
pub struct Accuracy;

impl Metric for Accuracy {
    fn evaluate(&self, output: &Tensor, target: &Tensor) -> Result<f32, NasError> {
        let predictions = output.argmax_rows()?;
        if predictions.len() != target.size() {
            return Err(NasError::Computation(format!(
                "预测数{}与标签数{}不一致",
                predictions.len(),
                target.size()
            )));
        }
        if predictions.is_empty() {
            return Ok(0.);
        }
        let correct = predictions
            .iter()
            .zip(target.data_as_slice())
            .filter(|&(&p, &t)| p as f32 == t.round())
            .count();
        Ok(correct as f32 / predictions.len() as f32)
    }
}

/// 在一张不记录梯度的临时图上求一个标量
fn scalar_on_scratch_graph<F>(build: F) -> Result<f32, NasError>
where
    F: FnOnce(&mut Graph) -> Result<NodeId, NasError>,
{
    let mut graph = Graph::new(ParamPool::new(Some(0)).into_handle(), false, false);
    let node = build(&mut graph)?;
    graph
        .value(node)
        .number()
        .ok_or_else(|| NasError::Computation("指标结果不是标量".to_string()))
}

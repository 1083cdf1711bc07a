/*
 * @Description  : 候选网络（CandidateNet）：由一次 rollout 从超网中选出的子网络
 *
 * 候选网络不拥有任何张量，训练类操作直接修改共享参数池，评估类操作在关闭梯度的图上进行。
 * 所有数据都在宿主内存中，“移动到设备”即为恒等操作。
 */

use super::virtual_scope::VirtualGuard;
use crate::errors::NasError;
use crate::nn::criterion::{Criterion, Metric};
use crate::nn::graph::{Graph, NodeId};
use crate::nn::module::NamedMembers;
use crate::nn::optimizer::Optimizer;
use crate::nn::pool::PoolHandle;
use crate::tensor::Tensor;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// 一批`(输入, 目标)`
pub type Batch = (Tensor, Tensor);

/// 训练/评估模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    pub const fn is_train(&self) -> bool {
        matches!(self, Self::Train)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Eval => write!(f, "eval"),
        }
    }
}

impl FromStr for Mode {
    type Err = NasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "eval" => Ok(Self::Eval),
            other => Err(NasError::UnrecognizedMode(other.to_string())),
        }
    }
}

/// `gradient`的结果：`(参数名, 梯度)`列表与同一次前向上的评估结果
#[derive(Debug, Clone)]
pub struct GradientOutput {
    pub grads: Vec<(String, Tensor)>,
    pub eval_results: Vec<f32>,
}

fn check_batch(inputs: &Tensor, targets: &Tensor) -> Result<(), NasError> {
    let n_inputs = inputs.shape().first().copied().unwrap_or(0);
    let n_targets = targets.shape().first().copied().unwrap_or(0);
    if n_inputs != n_targets {
        return Err(NasError::Computation(format!(
            "输入的批大小{n_inputs}与目标的批大小{n_targets}不一致"
        )));
    }
    Ok(())
}

fn next_batch(queue: &mut dyn Iterator<Item = Batch>) -> Result<Batch, NasError> {
    queue.next().ok_or(NasError::QueueExhausted)
}

fn evaluate_all(
    criterions: &[&dyn Metric],
    output: &Tensor,
    targets: &Tensor,
) -> Result<Vec<f32>, NasError> {
    criterions
        .iter()
        .map(|c| c.evaluate(output, targets))
        .collect()
}

fn average(sums: Vec<f32>, steps: usize) -> Vec<f32> {
    sums.into_iter().map(|s| s / steps as f32).collect()
}

/// 候选网络
///
/// 实现者只需给出参数池、模式、单次前向、激活成员与虚拟上下文，
/// 数据、队列、梯度与评估等操作都由默认实现提供
pub trait CandidateNet {
    fn pool(&self) -> &PoolHandle;

    fn mode(&self) -> Mode;

    fn set_mode(&self, mode: Mode);

    /// 在`graph`上构建一次前向，返回输出节点；`single`为true时不做数据并行切分
    fn forward(&self, graph: &mut Graph, inputs: &Tensor, single: bool) -> Result<NodeId, NasError>;

    /// 激活的参数（按`ParamId`去重）
    fn named_parameters(&self) -> Result<NamedMembers, NasError>;

    /// 激活的缓冲区（按`ParamId`去重）
    fn named_buffers(&self) -> Result<NamedMembers, NasError>;

    /// 进入虚拟上下文
    fn begin_virtual(&self) -> Result<VirtualGuard<'_>, NasError>;

    fn train(&self) {
        self.set_mode(Mode::Train);
    }

    fn eval(&self) {
        self.set_mode(Mode::Eval);
    }

    /// 按当前模式新建一张图
    fn new_graph(&self, grad_enabled: bool) -> Graph {
        Graph::new(self.pool().clone(), self.mode().is_train(), grad_enabled)
    }

    /// 前向一批数据并返回原始输出（不记录梯度）。给出`targets`时会核对批大小
    fn forward_data(
        &self,
        inputs: &Tensor,
        targets: Option<&Tensor>,
        mode: Option<Mode>,
    ) -> Result<Tensor, NasError> {
        if let Some(mode) = mode {
            self.set_mode(mode);
        }
        if let Some(targets) = targets {
            check_batch(inputs, targets)?;
        }
        let mut graph = self.new_graph(false);
        let out = self.forward(&mut graph, inputs, false)?;
        Ok(graph.value(out).clone())
    }

    /// 从队列中取`steps`批数据依次前向，输出沿第0维拼接
    fn forward_queue(
        &self,
        queue: &mut dyn Iterator<Item = Batch>,
        steps: usize,
        mode: Option<Mode>,
    ) -> Result<Tensor, NasError> {
        if steps == 0 {
            return Err(NasError::Computation("forward_queue的steps必须大于0".to_string()));
        }
        if let Some(mode) = mode {
            self.set_mode(mode);
        }
        let mut outputs = Vec::with_capacity(steps);
        for _ in 0..steps {
            let (inputs, targets) = next_batch(queue)?;
            outputs.push(self.forward_data(&inputs, Some(&targets), None)?);
        }
        Ok(Tensor::concat(&outputs.iter().collect::<Vec<_>>(), 0)?)
    }

    /// 在一批数据上求激活参数（或其中`parameters`指定的子集）的梯度。
    /// 没有梯度的参数不出现在结果中
    fn gradient(
        &self,
        data: (&Tensor, &Tensor),
        criterion: &dyn Criterion,
        parameters: Option<&[String]>,
        eval_criterions: &[&dyn Metric],
        mode: Mode,
    ) -> Result<GradientOutput, NasError> {
        let (inputs, targets) = data;
        check_batch(inputs, targets)?;
        let active = self.named_parameters()?;
        if let Some(requested) = parameters {
            let names = active.iter().map(|(n, _)| n.as_str()).collect::<HashSet<_>>();
            let invalid = requested
                .iter()
                .filter(|n| !names.contains(n.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            if !invalid.is_empty() {
                return Err(NasError::InvalidParameterSubset(invalid));
            }
        }

        self.set_mode(mode);
        let mut graph = self.new_graph(true);
        let out = self.forward(&mut graph, inputs, false)?;
        let loss = criterion.loss(&mut graph, out, targets)?;
        self.pool()
            .borrow_mut()
            .zero_grad(active.iter().map(|(_, id)| *id));
        graph.backward(loss)?;
        let eval_results = evaluate_all(eval_criterions, graph.value(out), targets)?;

        let pool = self.pool().borrow();
        let grads = match parameters {
            None => active
                .iter()
                .filter_map(|(name, id)| pool.grad(*id).map(|g| (name.clone(), g.clone())))
                .collect(),
            Some(requested) => requested
                .iter()
                .filter_map(|name| {
                    let (_, id) = active.iter().find(|(n, _)| n == name)?;
                    pool.grad(*id).map(|g| (name.clone(), g.clone()))
                })
                .collect(),
        };
        Ok(GradientOutput {
            grads,
            eval_results,
        })
    }

    /// 训练`steps`步，返回各评估指标的平均值；`steps == 0`时不访问队列与优化器，全部返回None
    fn train_queue(
        &self,
        queue: &mut dyn Iterator<Item = Batch>,
        optimizer: &mut dyn Optimizer,
        criterion: &dyn Criterion,
        eval_criterions: &[&dyn Metric],
        steps: usize,
    ) -> Result<Vec<Option<f32>>, NasError> {
        if steps == 0 {
            return Ok(vec![None; eval_criterions.len()]);
        }
        self.set_mode(Mode::Train);
        let active = self.named_parameters()?;
        let mut sums = vec![0.; eval_criterions.len()];
        for _ in 0..steps {
            let (inputs, targets) = next_batch(queue)?;
            check_batch(&inputs, &targets)?;
            let mut graph = self.new_graph(true);
            let out = self.forward(&mut graph, &inputs, false)?;
            let loss = criterion.loss(&mut graph, out, &targets)?;
            optimizer.zero_grad();
            self.pool()
                .borrow_mut()
                .zero_grad(active.iter().map(|(_, id)| *id));
            graph.backward(loss)?;
            optimizer.step()?;
            for (sum, value) in sums
                .iter_mut()
                .zip(evaluate_all(eval_criterions, graph.value(out), &targets)?)
            {
                *sum += value;
            }
        }
        Ok(average(sums, steps).into_iter().map(Some).collect())
    }

    /// 在`steps`批数据上求各评估指标的平均值（不记录梯度），默认使用评估模式
    fn eval_queue(
        &self,
        queue: &mut dyn Iterator<Item = Batch>,
        criterions: &[&dyn Metric],
        steps: usize,
        mode: Option<Mode>,
    ) -> Result<Vec<f32>, NasError> {
        if steps == 0 {
            return Err(NasError::Computation("eval_queue的steps必须大于0".to_string()));
        }
        self.set_mode(mode.unwrap_or(Mode::Eval));
        let mut sums = vec![0.; criterions.len()];
        for _ in 0..steps {
            let (inputs, targets) = next_batch(queue)?;
            let output = self.forward_data(&inputs, Some(&targets), None)?;
            for (sum, value) in sums.iter_mut().zip(evaluate_all(criterions, &output, &targets)?) {
                *sum += value;
            }
        }
        Ok(average(sums, steps))
    }

    /// 在一批数据上求各评估指标（不记录梯度），默认使用评估模式
    fn eval_data(
        &self,
        data: (&Tensor, &Tensor),
        criterions: &[&dyn Metric],
        mode: Option<Mode>,
    ) -> Result<Vec<f32>, NasError> {
        let (inputs, targets) = data;
        let output = self.forward_data(inputs, Some(targets), Some(mode.unwrap_or(Mode::Eval)))?;
        evaluate_all(criterions, &output, targets)
    }
}

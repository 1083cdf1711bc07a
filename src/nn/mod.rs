/*
 * @Description  : 负责神经网络（neural network）的构建：参数池、计算图、层、损失与优化器
 */

pub mod criterion;
pub mod graph;
pub mod layer;
pub mod module;
pub mod optimizer;
pub mod pool;

pub use criterion::{Accuracy, Criterion, CrossEntropyLoss, Metric, MseLoss};
pub use graph::{BatchNormSpec, Graph, NodeId};
pub use module::{Module, NamedMembers, dedup_members, join_name};
pub use optimizer::{Adam, Optimizer, SGD, clip_grad_norm};
pub use pool::{Init, MemberKind, ParamId, ParamPool, PoolHandle};

#[cfg(test)]
mod tests;

/*
 * @Description  : 候选原语（primitive）：共享边上可供选择的运算
 *
 * 注册表中的名称即基因型（genotype）里边的`op_type`。
 */

use super::{Conv1x1, ReluConvBn};
use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::module::{Module, NamedMembers};
use crate::nn::pool::{MemberKind, ParamPool};
use enum_dispatch::enum_dispatch;

/// 全部可用的原语名称
pub const PRIMITIVES: [&str; 5] = [
    "none",
    "skip_connect",
    "avg_pool_3x3",
    "conv_1x1",
    "relu_conv_bn_1x1",
];

#[enum_dispatch]
pub enum PrimitiveOp {
    Zero(Zero),
    Identity(Identity),
    AvgPool3x3(AvgPool3x3),
    Conv1x1(Conv1x1),
    ReluConvBn(ReluConvBn),
}

#[enum_dispatch(PrimitiveOp)]
pub trait Primitive: Module {
    fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError>;
}

impl Module for PrimitiveOp {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        match self {
            Self::Zero(op) => op.named_members(kind, prefix),
            Self::Identity(op) => op.named_members(kind, prefix),
            Self::AvgPool3x3(op) => op.named_members(kind, prefix),
            Self::Conv1x1(op) => op.named_members(kind, prefix),
            Self::ReluConvBn(op) => op.named_members(kind, prefix),
        }
    }
}

/// 按名称构建原语
pub fn build_primitive(
    name: &str,
    in_channels: usize,
    out_channels: usize,
    affine: bool,
    pool: &mut ParamPool,
) -> Result<PrimitiveOp, NasError> {
    let shape_preserving = || {
        if in_channels == out_channels {
            Ok(())
        } else {
            Err(NasError::Config(format!(
                "原语`{name}`要求输入输出通道数一致，实际为{in_channels}->{out_channels}"
            )))
        }
    };
    let op: PrimitiveOp = match name {
        "none" => {
            shape_preserving()?;
            Zero.into()
        }
        "skip_connect" => {
            shape_preserving()?;
            Identity.into()
        }
        "avg_pool_3x3" => {
            shape_preserving()?;
            AvgPool3x3.into()
        }
        "conv_1x1" => Conv1x1::new(pool, in_channels, out_channels).into(),
        "relu_conv_bn_1x1" => ReluConvBn::new(pool, in_channels, out_channels, affine).into(),
        other => return Err(NasError::UnknownPrimitive(other.to_string())),
    };
    Ok(op)
}

/// 输出全零（表示“无连接”）
pub struct Zero;

impl Module for Zero {
    fn named_members(&self, _kind: MemberKind, _prefix: &str) -> NamedMembers {
        Vec::new()
    }
}

impl Primitive for Zero {
    fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        Ok(graph.zeros_like(x))
    }
}

/// 恒等映射
pub struct Identity;

impl Module for Identity {
    fn named_members(&self, _kind: MemberKind, _prefix: &str) -> NamedMembers {
        Vec::new()
    }
}

impl Primitive for Identity {
    fn forward(&self, _graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        Ok(x)
    }
}

/// 3x3平均池化，不改变空间尺寸
pub struct AvgPool3x3;

impl Module for AvgPool3x3 {
    fn named_members(&self, _kind: MemberKind, _prefix: &str) -> NamedMembers {
        Vec::new()
    }
}

impl Primitive for AvgPool3x3 {
    fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        graph.avg_pool_3x3(x)
    }
}

impl Primitive for Conv1x1 {
    fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        Self::forward(self, graph, x)
    }
}

impl Primitive for ReluConvBn {
    fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        Self::forward(self, graph, x)
    }
}

/*
 * @Description  : 由卷积与批归一化组合而成的层
 */

use super::{BatchNorm2d, Conv1x1};
use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::module::{Module, NamedMembers, join_name};
use crate::nn::pool::{MemberKind, ParamPool};

/// conv -> bn，用作超网的主干（stem）
pub struct ConvBn {
    conv: Conv1x1,
    bn: BatchNorm2d,
}

impl ConvBn {
    pub fn new(pool: &mut ParamPool, in_channels: usize, out_channels: usize, affine: bool) -> Self {
        Self {
            conv: Conv1x1::new(pool, in_channels, out_channels),
            bn: BatchNorm2d::new(pool, out_channels, affine),
        }
    }

    pub fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        let y = self.conv.forward(graph, x)?;
        self.bn.forward(graph, y)
    }

    pub const fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }
}

impl Module for ConvBn {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        let mut members = self.conv.named_members(kind, &join_name(prefix, "conv"));
        members.extend(self.bn.named_members(kind, &join_name(prefix, "bn")));
        members
    }
}

/// relu -> conv -> bn，用作单元的预处理层以及候选原语之一
pub struct ReluConvBn {
    conv: Conv1x1,
    bn: BatchNorm2d,
}

impl ReluConvBn {
    pub fn new(pool: &mut ParamPool, in_channels: usize, out_channels: usize, affine: bool) -> Self {
        Self {
            conv: Conv1x1::new(pool, in_channels, out_channels),
            bn: BatchNorm2d::new(pool, out_channels, affine),
        }
    }

    pub fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        let y = graph.relu(x);
        let y = self.conv.forward(graph, y)?;
        self.bn.forward(graph, y)
    }

    pub const fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    pub const fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }
}

impl Module for ReluConvBn {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        let mut members = self.conv.named_members(kind, &join_name(prefix, "conv"));
        members.extend(self.bn.named_members(kind, &join_name(prefix, "bn")));
        members
    }
}

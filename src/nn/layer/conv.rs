/*
 * @Description  : 1x1 卷积层（无偏置，步长1）
 */

use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::module::{Module, NamedMembers, join_name};
use crate::nn::pool::{Init, MemberKind, ParamId, ParamPool};

/// 1x1 卷积层：逐像素的通道线性变换
///
/// # 输入/输出形状
/// - 输入：[N, in_channels, H, W]
/// - 输出：[N, out_channels, H, W]
pub struct Conv1x1 {
    /// 卷积核 [out_channels, in_channels]
    weight: ParamId,
    in_channels: usize,
    out_channels: usize,
}

impl Conv1x1 {
    pub fn new(pool: &mut ParamPool, in_channels: usize, out_channels: usize) -> Self {
        let weight = pool.register_parameter(&[out_channels, in_channels], Init::Kaiming);
        Self {
            weight,
            in_channels,
            out_channels,
        }
    }

    pub fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        graph.conv1x1(x, self.weight)
    }

    pub const fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Module for Conv1x1 {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        match kind {
            MemberKind::Parameters => vec![(join_name(prefix, "weight"), self.weight)],
            MemberKind::Buffers => Vec::new(),
        }
    }
}

/*
 * @Description  : Linear (全连接) 层，超网的分类头
 */

use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::module::{Module, NamedMembers, join_name};
use crate::nn::pool::{Init, MemberKind, ParamId, ParamPool};

/// Linear (全连接) 层
///
/// # 输入/输出形状
/// - 输入：[batch_size, in_features]
/// - 输出：[batch_size, out_features]
pub struct Linear {
    /// 权重参数 [out_features, in_features]
    weight: ParamId,
    /// 偏置参数 [out_features]（可选）
    bias: Option<ParamId>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    pub fn new(pool: &mut ParamPool, in_features: usize, out_features: usize, use_bias: bool) -> Self {
        // Kaiming 初始化适合 ReLU
        let weight = pool.register_parameter(&[out_features, in_features], Init::Kaiming);
        let bias = use_bias.then(|| pool.register_parameter(&[out_features], Init::Zeros));
        Self {
            weight,
            bias,
            in_features,
            out_features,
        }
    }

    pub fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        graph.linear(x, self.weight, self.bias)
    }

    pub const fn in_features(&self) -> usize {
        self.in_features
    }

    pub const fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Linear {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        match kind {
            MemberKind::Parameters => std::iter::once(("weight", self.weight))
                .chain(self.bias.map(|b| ("bias", b)))
                .map(|(name, id)| (join_name(prefix, name), id))
                .collect(),
            MemberKind::Buffers => Vec::new(),
        }
    }
}

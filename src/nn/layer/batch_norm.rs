/*
 * @Description  : 2D 批归一化层
 *
 * 仿射参数（weight/bias）可选；滑动均值/方差作为缓冲区登记在参数池中，
 * 训练模式下的前向计算会原地更新它们。
 */

use crate::errors::NasError;
use crate::nn::graph::{BatchNormSpec, Graph, NodeId};
use crate::nn::module::{Module, NamedMembers, join_name};
use crate::nn::pool::{Init, MemberKind, ParamPool};
use crate::tensor::Tensor;

pub struct BatchNorm2d {
    spec: BatchNormSpec,
    num_features: usize,
}

impl BatchNorm2d {
    pub fn new(pool: &mut ParamPool, num_features: usize, affine: bool) -> Self {
        let weight = affine.then(|| pool.register_parameter(&[num_features], Init::Ones));
        let bias = affine.then(|| pool.register_parameter(&[num_features], Init::Zeros));
        let running_mean = pool.register_buffer(Tensor::zeros(&[num_features]));
        let running_var = pool.register_buffer(Tensor::ones(&[num_features]));
        Self {
            spec: BatchNormSpec {
                weight,
                bias,
                running_mean,
                running_var,
                momentum: 0.1,
                eps: 1e-5,
            },
            num_features,
        }
    }

    pub fn forward(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        graph.batch_norm(x, &self.spec)
    }

    pub const fn num_features(&self) -> usize {
        self.num_features
    }

    pub const fn is_affine(&self) -> bool {
        self.spec.weight.is_some()
    }
}

impl Module for BatchNorm2d {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        let members = match kind {
            MemberKind::Parameters => self
                .spec
                .weight
                .map(|w| ("weight", w))
                .into_iter()
                .chain(self.spec.bias.map(|b| ("bias", b)))
                .collect::<Vec<_>>(),
            MemberKind::Buffers => vec![
                ("running_mean", self.spec.running_mean),
                ("running_var", self.spec.running_var),
            ],
        };
        members
            .into_iter()
            .map(|(name, id)| (join_name(prefix, name), id))
            .collect()
    }
}

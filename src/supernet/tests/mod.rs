mod candidate;

use crate::search_space::{Edge, Rollout, SearchSpaceConfig};
use crate::supernet::{StateDict, SuperNetConfig};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// 3层（布局[0, 1, 1]）、每单元2个中间节点的小超网
pub(super) fn tiny_config() -> SuperNetConfig {
    SuperNetConfig {
        search_space: SearchSpaceConfig {
            num_layers: 3,
            num_steps: 2,
            ..Default::default()
        },
        in_channels: 3,
        num_classes: 4,
        init_channels: 4,
        stem_multiplier: 1,
        seed: Some(42),
        ..Default::default()
    }
}

pub(super) fn normal_genotype() -> Vec<Edge> {
    vec![
        Edge::new("conv_1x1", 0, 2),
        Edge::new("skip_connect", 1, 2),
        Edge::new("relu_conv_bn_1x1", 2, 3),
        Edge::new("avg_pool_3x3", 0, 3),
    ]
}

pub(super) fn reduce_genotype() -> Vec<Edge> {
    vec![
        Edge::new("skip_connect", 0, 2),
        Edge::new("conv_1x1", 1, 2),
        Edge::new("none", 0, 3),
        Edge::new("relu_conv_bn_1x1", 2, 3),
    ]
}

pub(super) fn tiny_rollout() -> Rollout {
    Rollout::new(vec![
        ("normal_0".to_string(), normal_genotype()),
        ("normal_0_concat".to_string(), Vec::new()),
        ("reduce_1".to_string(), reduce_genotype()),
    ])
}

/// 随机输入`[n, 3, 5, 5]`与类别标签`[n]`
pub(super) fn batch(n: usize, seed: u64) -> (Tensor, Tensor) {
    let mut rng = StdRng::seed_from_u64(seed);
    let inputs = Tensor::normal_with_rng(0., 1., &[n, 3, 5, 5], &mut rng);
    let labels = (0..n).map(|i| (i % 4) as f32).collect::<Vec<_>>();
    (inputs, Tensor::new(&labels, &[n]))
}

pub(super) fn assert_state_dict_eq(a: &StateDict, b: &StateDict) {
    assert_eq!(a.names().collect::<Vec<_>>(), b.names().collect::<Vec<_>>());
    for (name, tensor) in a.iter() {
        let other = b.get(name).unwrap();
        assert!(tensor.allclose(other, 1e-7), "{name}不一致");
    }
}

pub(super) fn state_dict_differs(a: &StateDict, b: &StateDict) -> bool {
    a.iter()
        .any(|(name, tensor)| !b.get(name).is_some_and(|other| tensor.allclose(other, 1e-7)))
}

/*
 * @Description  : 配置与持久化测试：JSON配置往返、权重保存/载入、候选网络状态字典，
 *                 以及虚拟上下文中的逐步前向
 */
use only_nas::errors::NasError;
use only_nas::nn::{CrossEntropyLoss, Optimizer, SGD};
use only_nas::search_space::{Edge, Rollout, SearchSpaceConfig};
use only_nas::supernet::{
    CandidateNet, Mode, StateDict, SuperNet, SuperNetConfig, WeightsManager, with_virtual,
};
use only_nas::tensor::Tensor;

fn rollout() -> Rollout {
    let genotype = vec![
        Edge::new("conv_1x1", 0, 2),
        Edge::new("skip_connect", 1, 2),
        Edge::new("relu_conv_bn_1x1", 2, 3),
        Edge::new("skip_connect", 0, 3),
    ];
    Rollout::new(vec![
        ("normal_0".to_string(), genotype.clone()),
        ("reduce_1".to_string(), genotype),
    ])
}

fn config() -> SuperNetConfig {
    SuperNetConfig {
        search_space: SearchSpaceConfig {
            num_steps: 2,
            ..Default::default()
        },
        in_channels: 2,
        num_classes: 3,
        init_channels: 2,
        stem_multiplier: 2,
        seed: Some(11),
        ..Default::default()
    }
}

fn inputs() -> Tensor {
    let data = (0..2 * 2 * 3 * 3)
        .map(|i| (i as f32 * 0.37).sin())
        .collect::<Vec<_>>();
    Tensor::new(&data, &[2, 2, 3, 3])
}

#[test]
fn test_config_json_round_trip() -> Result<(), NasError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.json");
    std::fs::write(&path, config().to_json_string()?)?;
    let loaded = SuperNetConfig::from_json_file(&path)?;
    assert_eq!(loaded, config());
    assert_eq!(loaded.search_space.num_layers, 8);
    Ok(())
}

#[test]
fn test_save_load_reproduces_outputs() -> Result<(), NasError> {
    let dir = tempfile::tempdir()?;
    let weights = dir.path().join("weights.bin");

    let super_net = SuperNet::new(&config())?;
    let candidate = super_net.assemble_candidate(&rollout())?;
    let expected = candidate.forward_data(&inputs(), None, Some(Mode::Eval))?;
    super_net.save(&weights)?;

    let restored_net = SuperNet::new(&SuperNetConfig {
        seed: Some(99),
        ..config()
    })?;
    let restored = restored_net.assemble_candidate(&rollout())?;
    let before_load = restored.forward_data(&inputs(), None, Some(Mode::Eval))?;
    assert!(!before_load.allclose(&expected, 1e-6));

    restored_net.load(&weights)?;
    let actual = restored.forward_data(&inputs(), None, Some(Mode::Eval))?;
    assert!(actual.allclose(&expected, 1e-6));
    Ok(())
}

#[test]
fn test_candidate_state_dict_file() -> Result<(), NasError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("candidate.bin");

    let super_net = SuperNet::new(&config())?;
    let candidate = super_net.assemble_candidate(&rollout())?;
    candidate.state_dict()?.save(&path)?;

    let ids = candidate
        .named_parameters()?
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    let mut optimizer = SGD::new(candidate.pool(), ids, 0.5);
    let batch = (inputs(), Tensor::new(&[0., 2.], &[2]));
    candidate.train_queue(
        &mut std::iter::repeat(batch),
        &mut optimizer,
        &CrossEntropyLoss,
        &[],
        2,
    )?;

    let saved = StateDict::load(&path)?;
    candidate.load_state_dict(&saved, true)?;
    for (name, tensor) in candidate.state_dict()?.iter() {
        assert!(tensor.allclose(saved.get(name).unwrap(), 0.), "{name}");
    }
    Ok(())
}

#[test]
fn test_virtual_step_forward_leaves_weights() -> Result<(), NasError> {
    let super_net = SuperNet::new(&config())?;
    let candidate = super_net.assemble_candidate(&rollout())?;
    candidate.eval();
    let before = super_net.state_dict()?;

    // 在虚拟上下文中逐步前向，记录每个单元的输出形状，再按最终输出的损失更新一步
    let cell_shapes = with_virtual(&candidate, |c| {
        let mut shapes = Vec::new();
        let (logits, context) = c.forward_one_step_callback(&inputs(), |_, context| {
            if context.is_end_of_cell() {
                shapes.push(context.value(context.last_state()).shape().to_vec());
            }
            Ok(())
        })?;
        let mut graph = context.into_graph();
        let loss = graph.softmax_cross_entropy(logits, &Tensor::new(&[1., 0.], &[2]))?;
        graph.backward(loss)?;
        let ids = c.named_parameters()?.into_iter().map(|(_, id)| id).collect();
        SGD::new(c.pool(), ids, 1.).step()?;
        Ok(shapes)
    })?;

    // 主干 + 8个单元 + 分类头
    assert_eq!(cell_shapes.len(), 10);
    assert_eq!(cell_shapes[0], [2, 4, 3, 3]);
    assert_eq!(cell_shapes[1], [2, 4, 3, 3]);
    assert_eq!(cell_shapes[9], [2, 3]);
    let after = super_net.state_dict()?;
    for (name, tensor) in before.iter() {
        assert!(tensor.allclose(after.get(name).unwrap(), 0.), "{name}");
    }
    Ok(())
}

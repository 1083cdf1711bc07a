/*
 * @Description  : CandidateNet / SubCandidateNet 单元测试
 */

use super::{assert_state_dict_eq, batch, state_dict_differs, tiny_config, tiny_rollout};
use crate::assert_err;
use crate::errors::NasError;
use crate::nn::criterion::{Accuracy, CrossEntropyLoss, Metric};
use crate::nn::module::Module;
use crate::nn::optimizer::{Optimizer, SGD};
use crate::search_space::{Edge, Rollout, RolloutType};
use crate::supernet::{Batch, CandidateNet, Mode, StateDict, SuperNet, SuperNetConfig, WeightsManager};
use crate::tensor::Tensor;
use std::collections::HashSet;

/// 记录被调用次数的优化器
#[derive(Default)]
struct CountingOptimizer {
    zero_grads: usize,
    steps: usize,
}

impl Optimizer for CountingOptimizer {
    fn zero_grad(&mut self) {
        self.zero_grads += 1;
    }

    fn step(&mut self) -> Result<(), NasError> {
        self.steps += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        0.
    }

    fn set_learning_rate(&mut self, _lr: f32) {}

    fn reset(&mut self) {}
}

#[test]
fn test_mode_parse() {
    assert_eq!("train".parse::<Mode>().unwrap(), Mode::Train);
    assert_eq!("eval".parse::<Mode>().unwrap(), Mode::Eval);
    assert_eq!(Mode::Eval.to_string(), "eval");
    assert_err!(
        "test".parse::<Mode>(),
        NasError::UnrecognizedMode(mode) if mode == "test"
    );
}

#[test]
fn test_assemble_candidate_validation() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    assert_eq!(candidate.genotypes().len(), 2);
    assert_eq!(candidate.genotypes_grouped()[0].len(), 2);

    let differentiable = Rollout::with_type(
        tiny_rollout().genotype_list().to_vec(),
        RolloutType::Differentiable,
    );
    assert_err!(
        super_net.assemble_candidate(&differentiable),
        NasError::UnsupportedRolloutType(_)
    );

    let missing_group = Rollout::new(vec![("normal_0".to_string(), super::normal_genotype())]);
    assert_err!(
        super_net.assemble_candidate(&missing_group),
        NasError::InvalidGenotype(_)
    );

    let unknown = Rollout::new(vec![
        ("normal_0".to_string(), vec![Edge::new("sep_conv_3x3", 0, 2), Edge::new("conv_1x1", 0, 3)]),
        ("reduce_1".to_string(), super::reduce_genotype()),
    ]);
    assert_err!(
        super_net.assemble_candidate(&unknown),
        NasError::UnknownPrimitive(_)
    );
}

#[test]
fn test_active_members_no_duplicates() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let params = candidate.named_parameters().unwrap();
    let ids = params.iter().map(|(_, id)| *id).collect::<HashSet<_>>();
    assert_eq!(ids.len(), params.len());
    let names = params.iter().map(|(n, _)| n.as_str()).collect::<HashSet<_>>();
    for required in ["stem.conv.weight", "classifier.weight", "classifier.bias"] {
        assert!(names.contains(required), "缺少{required}");
    }
    assert!(params.len() < super_net.num_params());
}

#[test]
fn test_masking_equivalence_of_state_dict() {
    let masked_net = SuperNet::new(&tiny_config()).unwrap();
    let unmasked_net = SuperNet::new(&SuperNetConfig {
        candidate_member_mask: false,
        ..tiny_config()
    })
    .unwrap();
    let masked = masked_net.assemble_candidate(&tiny_rollout()).unwrap();
    let unmasked = unmasked_net.assemble_candidate(&tiny_rollout()).unwrap();

    // 可见成员不同
    assert_eq!(
        unmasked.named_parameters().unwrap().len(),
        unmasked_net.num_params()
    );
    assert!(masked.named_parameters().unwrap().len() < unmasked_net.num_params());
    // 状态字典都只含激活成员
    assert_state_dict_eq(&masked.state_dict().unwrap(), &unmasked.state_dict().unwrap());

    let state_dict = masked.state_dict().unwrap();
    let n_params = masked.named_parameters().unwrap().len();
    let n_buffers = masked.named_buffers().unwrap().len();
    assert_eq!(state_dict.len(), n_params + n_buffers);
    assert_eq!(state_dict.names().next(), Some("stem.conv.weight"));
    assert!(
        state_dict
            .names()
            .skip(n_params)
            .all(|n| n.ends_with("running_mean") || n.ends_with("running_var"))
    );
}

#[test]
fn test_cached_named_members() {
    let super_net = SuperNet::new(&SuperNetConfig {
        candidate_cache_named_members: true,
        ..tiny_config()
    })
    .unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let first = candidate.named_parameters().unwrap();
    let second = candidate.named_parameters().unwrap();
    assert_eq!(first, second);

    let uncached_net = SuperNet::new(&tiny_config()).unwrap();
    let uncached = uncached_net.assemble_candidate(&tiny_rollout()).unwrap();
    let names = |m: &[(String, crate::nn::pool::ParamId)]| {
        m.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&uncached.named_parameters().unwrap()));
}

#[test_log::test]
fn test_gradient_subset() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let (inputs, targets) = batch(4, 0);

    let all = candidate
        .gradient((&inputs, &targets), &CrossEntropyLoss, None, &[&Accuracy], Mode::Train)
        .unwrap();
    assert!(!all.grads.is_empty());
    assert_eq!(all.eval_results.len(), 1);
    let active = candidate
        .named_parameters()
        .unwrap()
        .into_iter()
        .map(|(n, _)| n)
        .collect::<HashSet<_>>();
    assert!(all.grads.iter().all(|(name, _)| active.contains(name)));

    let requested = vec!["classifier.weight".to_string(), "stem.conv.weight".to_string()];
    let subset = candidate
        .gradient((&inputs, &targets), &CrossEntropyLoss, Some(requested.as_slice()), &[], Mode::Train)
        .unwrap();
    assert_eq!(subset.grads.len(), 2);
    assert_eq!(subset.grads[0].0, "classifier.weight");
    assert_eq!(subset.grads[0].1.shape(), &[4, 32]);
    assert!(subset.eval_results.is_empty());

    // 节点1 -> 2 的边选的是skip_connect，其conv_1x1不在激活集合中
    let inactive = "cells.0.edge_mod.f_1_t_2.p_ops.3.weight".to_string();
    assert!(
        super_net
            .named_parameters("")
            .iter()
            .any(|(n, _)| *n == inactive)
    );
    let bad = vec!["classifier.weight".to_string(), inactive.clone()];
    assert_err!(
        candidate.gradient((&inputs, &targets), &CrossEntropyLoss, Some(bad.as_slice()), &[], Mode::Train),
        NasError::InvalidParameterSubset(names) if *names == vec![inactive.clone()]
    );
}

#[test]
fn test_gradient_does_not_change_parameters() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let (inputs, targets) = batch(4, 0);
    let before = candidate.named_parameters().unwrap();
    let values = before
        .iter()
        .map(|(_, id)| super_net.pool().borrow().value(*id).clone())
        .collect::<Vec<_>>();
    candidate
        .gradient((&inputs, &targets), &CrossEntropyLoss, None, &[], Mode::Eval)
        .unwrap();
    assert_eq!(candidate.mode(), Mode::Eval);
    let pool = super_net.pool().borrow();
    for ((_, id), value) in before.iter().zip(&values) {
        assert!(pool.value(*id).allclose(value, 0.));
    }
}

#[test]
fn test_train_queue_zero_steps_is_noop() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let before = super_net.state_dict().unwrap();

    let mut pulled = 0;
    let mut queue = std::iter::repeat_with(|| {
        pulled += 1;
        batch(2, 0)
    });
    let mut optimizer = CountingOptimizer::default();
    let results = candidate
        .train_queue(&mut queue, &mut optimizer, &CrossEntropyLoss, &[&Accuracy, &CrossEntropyLoss], 0)
        .unwrap();
    drop(queue);

    assert_eq!(results, vec![None, None]);
    assert_eq!(pulled, 0);
    assert_eq!(optimizer.steps, 0);
    assert_eq!(optimizer.zero_grads, 0);
    assert_state_dict_eq(&before, &super_net.state_dict().unwrap());
}

#[test]
fn test_train_queue_updates_active_parameters() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let before = candidate.state_dict().unwrap();
    let ids = candidate
        .named_parameters()
        .unwrap()
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    let mut optimizer = SGD::new(super_net.pool(), ids, 0.1);
    let mut queue = std::iter::repeat_with(|| batch(4, 3));

    let results = candidate
        .train_queue(&mut queue, &mut optimizer, &CrossEntropyLoss, &[&Accuracy], 2)
        .unwrap();
    assert_eq!(results.len(), 1);
    let accuracy = results[0].unwrap();
    assert!((0. ..=1.).contains(&accuracy));
    assert_eq!(candidate.mode(), Mode::Train);
    assert!(state_dict_differs(&before, &candidate.state_dict().unwrap()));

    let mut empty = std::iter::empty::<Batch>();
    assert_err!(
        candidate.train_queue(&mut empty, &mut optimizer, &CrossEntropyLoss, &[], 1),
        NasError::QueueExhausted
    );
}

#[test]
fn test_eval_queue_leaves_state_untouched() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let before = super_net.state_dict().unwrap();
    let mut queue = (0..3).map(|seed| batch(4, seed));

    let results = candidate
        .eval_queue(&mut queue, &[&Accuracy, &CrossEntropyLoss], 3, None)
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[1] > 0.);
    assert_eq!(candidate.mode(), Mode::Eval);
    assert_state_dict_eq(&before, &super_net.state_dict().unwrap());

    assert_err!(
        candidate.eval_queue(&mut queue, &[&Accuracy], 1, None),
        NasError::QueueExhausted
    );
    assert_err!(
        candidate.eval_queue(&mut std::iter::empty::<Batch>(), &[&Accuracy], 0, None),
        NasError::Computation(_)
    );
}

#[test]
fn test_eval_data_with_closure_metric() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let (inputs, targets) = batch(4, 1);
    let batch_size = |output: &Tensor, _: &Tensor| output.shape()[0] as f32;
    let results = candidate
        .eval_data((&inputs, &targets), &[&batch_size as &dyn Metric], None)
        .unwrap();
    assert_eq!(results, vec![4.]);

    let wrong_targets = Tensor::zeros(&[3]);
    assert_err!(
        candidate.eval_data((&inputs, &wrong_targets), &[&Accuracy], None),
        NasError::Computation(_)
    );
}

#[test]
fn test_forward_queue_concatenates() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let mut queue = vec![batch(4, 0), batch(2, 1)].into_iter();
    let out = candidate
        .forward_queue(&mut queue, 2, Some(Mode::Eval))
        .unwrap();
    assert_eq!(out.shape(), &[6, 4]);

    let (first, _) = batch(4, 0);
    let single = candidate.forward_data(&first, None, None).unwrap();
    assert!(out.narrow(0, 0, 4).unwrap().allclose(&single, 1e-6));
}

#[test]
fn test_forward_data_train_mode_updates_buffers_only() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let params_before = candidate
        .named_parameters()
        .unwrap()
        .iter()
        .map(|(_, id)| super_net.pool().borrow().value(*id).clone())
        .collect::<Vec<_>>();
    let buffers = candidate.named_buffers().unwrap();
    let buffers_before = buffers
        .iter()
        .map(|(_, id)| super_net.pool().borrow().value(*id).clone())
        .collect::<Vec<_>>();

    let (inputs, _) = batch(4, 0);
    candidate
        .forward_data(&inputs, None, Some(Mode::Train))
        .unwrap();

    let pool = super_net.pool().borrow();
    for ((_, id), value) in candidate.named_parameters().unwrap().iter().zip(&params_before) {
        assert!(pool.value(*id).allclose(value, 0.));
    }
    assert!(
        buffers
            .iter()
            .zip(&buffers_before)
            .any(|((_, id), value)| !pool.value(*id).allclose(value, 1e-7))
    );
}

#[test]
fn test_data_parallel_forward() {
    let single_net = SuperNet::new(&tiny_config()).unwrap();
    let parallel_net = SuperNet::new(&SuperNetConfig {
        devices: vec![0, 1],
        ..tiny_config()
    })
    .unwrap();
    let single = single_net.assemble_candidate(&tiny_rollout()).unwrap();
    let parallel = parallel_net.assemble_candidate(&tiny_rollout()).unwrap();
    assert_eq!(parallel.devices(), &[0, 1]);

    let (inputs, _) = batch(5, 2);
    let expected = single.forward_data(&inputs, None, Some(Mode::Eval)).unwrap();
    let actual = parallel.forward_data(&inputs, None, Some(Mode::Eval)).unwrap();
    assert_eq!(actual.shape(), &[5, 4]);
    assert!(actual.allclose(&expected, 1e-5));

    let mut graph = parallel.new_graph(false);
    let out = parallel.forward(&mut graph, &inputs, true).unwrap();
    assert!(graph.value(out).allclose(&expected, 1e-5));

    assert_err!(
        parallel.forward_one_step(None, Some(&inputs)),
        NasError::UnsupportedOperation(_)
    );
    assert_err!(
        parallel.forward_one_step_callback(&inputs, |_, _| Ok(())),
        NasError::UnsupportedOperation(_)
    );
}

#[test]
fn test_data_parallel_updates_running_stats_once() {
    let single_net = SuperNet::new(&tiny_config()).unwrap();
    let parallel_net = SuperNet::new(&SuperNetConfig {
        devices: vec![0, 1],
        ..tiny_config()
    })
    .unwrap();
    let single = single_net.assemble_candidate(&tiny_rollout()).unwrap();
    let parallel = parallel_net.assemble_candidate(&tiny_rollout()).unwrap();

    // 训练模式下整批前向一次，BN缓冲区只按第一个副本的批统计量更新一次
    let (inputs, _) = batch(6, 3);
    let first_chunk = inputs.split_batch(2).unwrap().remove(0);
    assert_eq!(first_chunk.shape()[0], 3);
    single.forward_data(&first_chunk, None, Some(Mode::Train)).unwrap();
    let out = parallel.forward_data(&inputs, None, Some(Mode::Train)).unwrap();
    assert_eq!(out.shape(), &[6, 4]);
    assert_state_dict_eq(
        &single_net.state_dict().unwrap(),
        &parallel_net.state_dict().unwrap(),
    );

    // 之后的单副本图照常更新缓冲区
    let before = parallel_net.state_dict().unwrap();
    let mut graph = parallel.new_graph(false);
    parallel.forward(&mut graph, &inputs, true).unwrap();
    assert!(graph.is_updating_running_stats());
    assert!(state_dict_differs(&before, &parallel_net.state_dict().unwrap()));
}

#[test]
fn test_load_state_dict() {
    let super_net = SuperNet::new(&tiny_config()).unwrap();
    let candidate = super_net.assemble_candidate(&tiny_rollout()).unwrap();
    let saved = candidate.state_dict().unwrap();

    let ids = candidate
        .named_parameters()
        .unwrap()
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    let mut optimizer = SGD::new(super_net.pool(), ids, 0.5);
    let mut queue = std::iter::repeat_with(|| batch(4, 0));
    candidate
        .train_queue(&mut queue, &mut optimizer, &CrossEntropyLoss, &[], 1)
        .unwrap();
    assert!(state_dict_differs(&saved, &candidate.state_dict().unwrap()));

    candidate.load_state_dict(&saved, true).unwrap();
    assert_state_dict_eq(&saved, &candidate.state_dict().unwrap());

    let mut partial = StateDict::new();
    partial.insert("classifier.bias", Tensor::zeros(&[4]));
    assert_err!(
        candidate.load_state_dict(&partial, true),
        NasError::StateDictMismatch(_)
    );
    candidate.load_state_dict(&partial, false).unwrap();
    assert!(
        candidate
            .state_dict()
            .unwrap()
            .get("classifier.bias")
            .unwrap()
            .allclose(&Tensor::zeros(&[4]), 0.)
    );

    let mut wrong_shape = StateDict::new();
    wrong_shape.insert("classifier.bias", Tensor::zeros(&[5]));
    assert_err!(
        candidate.load_state_dict(&wrong_shape, false),
        NasError::StateDictMismatch(_)
    );
}

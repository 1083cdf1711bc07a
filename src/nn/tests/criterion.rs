//! Criterion / Metric 单元测试

use crate::assert_err;
use crate::errors::NasError;
use crate::nn::criterion::{Accuracy, Criterion, CrossEntropyLoss, Metric, MseLoss};
use crate::nn::graph::Graph;
use crate::nn::pool::{Init, ParamPool};
use crate::tensor::Tensor;
use approx::assert_abs_diff_eq;

#[test]
fn test_cross_entropy_loss_on_graph() {
    let mut pool = ParamPool::new(Some(42));
    let w = pool.register_parameter(&[3, 2], Init::Kaiming);
    let pool = pool.into_handle();
    let mut graph = Graph::new(pool.clone(), true, true);
    let x = graph.input(&Tensor::new(&[1., 0., 0., 1.], &[2, 2]));
    let logits = graph.linear(x, w, None).unwrap();
    let loss = CrossEntropyLoss
        .loss(&mut graph, logits, &Tensor::new(&[2., 0.], &[2]))
        .unwrap();
    let value = graph.backward(loss).unwrap();
    assert!(value > 0.);
    assert!(pool.borrow().grad(w).is_some());
}

#[test]
fn test_cross_entropy_metric_matches_loss() {
    let output = Tensor::new(&[2., 0., 0., 0., 3., 1.], &[2, 3]);
    let target = Tensor::new(&[0., 2.], &[2]);
    let metric = CrossEntropyLoss.evaluate(&output, &target).unwrap();

    let mut graph = Graph::new(ParamPool::new(None).into_handle(), false, false);
    let logits = graph.input(&output);
    let loss = CrossEntropyLoss.loss(&mut graph, logits, &target).unwrap();
    assert_abs_diff_eq!(metric, graph.value(loss).to_vec()[0], epsilon = 1e-6);
}

#[test]
fn test_mse_metric() {
    let output = Tensor::new(&[1., 2.], &[2, 1]);
    let target = Tensor::new(&[0., 0.], &[2, 1]);
    assert_abs_diff_eq!(MseLoss.evaluate(&output, &target).unwrap(), 2.5);
    assert_err!(
        MseLoss.evaluate(&output, &Tensor::zeros(&[2])),
        NasError::Computation(_)
    );
}

#[test]
fn test_accuracy() {
    let output = Tensor::new(&[0.9, 0.1, 0.2, 0.8, 0.6, 0.4], &[3, 2]);
    let target = Tensor::new(&[0., 1., 1.], &[3]);
    assert_abs_diff_eq!(Accuracy.evaluate(&output, &target).unwrap(), 2. / 3.);
    assert_err!(Accuracy.evaluate(&output, &Tensor::zeros(&[2])));
}

#[test]
fn test_closure_as_metric() {
    let batch_size = |output: &Tensor, _: &Tensor| output.shape()[0] as f32;
    let output = Tensor::zeros(&[4, 2]);
    assert_eq!(batch_size.evaluate(&output, &output).unwrap(), 4.);
}

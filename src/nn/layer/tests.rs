use crate::assert_err;
use crate::errors::NasError;
use crate::nn::graph::Graph;
use crate::nn::layer::{
    BatchNorm2d, ConvBn, Linear, PRIMITIVES, Primitive, PrimitiveOp, ReluConvBn, build_primitive,
};
use crate::nn::module::Module;
use crate::nn::pool::ParamPool;
use crate::tensor::Tensor;

fn names(members: &[(String, crate::nn::pool::ParamId)]) -> Vec<&str> {
    members.iter().map(|(n, _)| n.as_str()).collect()
}

#[test]
fn test_linear_member_names() {
    let mut pool = ParamPool::new(Some(0));
    let fc = Linear::new(&mut pool, 4, 3, true);
    assert_eq!(names(&fc.named_parameters("classifier")), ["classifier.weight", "classifier.bias"]);
    assert!(fc.named_buffers("classifier").is_empty());
    assert_eq!(pool.value(fc.named_parameters("")[0].1).shape(), &[3, 4]);

    let no_bias = Linear::new(&mut pool, 4, 3, false);
    assert_eq!(no_bias.num_params(), 1);
}

#[test]
fn test_batch_norm_member_names() {
    let mut pool = ParamPool::new(Some(0));
    let bn = BatchNorm2d::new(&mut pool, 8, true);
    assert!(bn.is_affine());
    assert_eq!(names(&bn.named_parameters("bn")), ["bn.weight", "bn.bias"]);
    assert_eq!(names(&bn.named_buffers("bn")), ["bn.running_mean", "bn.running_var"]);

    let bn = BatchNorm2d::new(&mut pool, 8, false);
    assert!(bn.named_parameters("bn").is_empty());
    assert_eq!(bn.named_buffers("bn").len(), 2);
}

#[test]
fn test_composite_member_names() {
    let mut pool = ParamPool::new(Some(0));
    let stem = ConvBn::new(&mut pool, 3, 6, true);
    assert_eq!(stem.out_channels(), 6);
    assert_eq!(
        names(&stem.named_parameters("stem")),
        ["stem.conv.weight", "stem.bn.weight", "stem.bn.bias"]
    );
    let rcb = ReluConvBn::new(&mut pool, 6, 4, false);
    assert_eq!(names(&rcb.named_parameters("p")), ["p.conv.weight"]);
    assert_eq!(names(&rcb.named_buffers("p")), ["p.bn.running_mean", "p.bn.running_var"]);
}

#[test]
fn test_build_every_primitive() {
    let mut pool = ParamPool::new(Some(0));
    let ops = PRIMITIVES
        .iter()
        .map(|name| build_primitive(name, 2, 2, false, &mut pool).unwrap())
        .collect::<Vec<_>>();
    assert!(matches!(ops[0], PrimitiveOp::Zero(_)));
    assert!(matches!(ops[1], PrimitiveOp::Identity(_)));
    assert!(matches!(ops[2], PrimitiveOp::AvgPool3x3(_)));
    assert!(matches!(ops[3], PrimitiveOp::Conv1x1(_)));
    assert!(matches!(ops[4], PrimitiveOp::ReluConvBn(_)));
    let param_counts = ops.iter().map(Module::num_params).collect::<Vec<_>>();
    assert_eq!(param_counts, [0, 0, 0, 1, 1]);

    let handle = pool.into_handle();
    let mut graph = Graph::new(handle, true, false);
    let input = Tensor::new(&[1., -2., 3., 4., 5., -6., 7., 8.], &[1, 2, 2, 2]);
    let x = graph.input(&input);
    for op in &ops {
        let y = op.forward(&mut graph, x).unwrap();
        assert_eq!(graph.value(y).shape(), &[1, 2, 2, 2]);
    }
    let zero = ops[0].forward(&mut graph, x).unwrap();
    assert_eq!(graph.value(zero), &Tensor::zeros(&[1, 2, 2, 2]));
    assert_eq!(ops[1].forward(&mut graph, x).unwrap(), x);
}

#[test]
fn test_build_primitive_errors() {
    let mut pool = ParamPool::new(Some(0));
    assert_err!(
        build_primitive("sep_conv_3x3", 2, 2, false, &mut pool),
        NasError::UnknownPrimitive(name) if name == "sep_conv_3x3"
    );
    assert_err!(build_primitive("skip_connect", 2, 4, false, &mut pool), NasError::Config(_));
    assert!(build_primitive("conv_1x1", 2, 4, false, &mut pool).is_ok());
}

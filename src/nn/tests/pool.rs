use crate::assert_err;
use crate::errors::NasError;
use crate::nn::pool::{Init, MemberKind, ParamPool};
use crate::tensor::Tensor;

#[test]
fn test_register_and_query() {
    let mut pool = ParamPool::new(Some(1));
    let w = pool.register_parameter(&[4, 3], Init::Kaiming);
    let running = pool.register_buffer(Tensor::zeros(&[4]));
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.kind(w), MemberKind::Parameters);
    assert_eq!(pool.kind(running), MemberKind::Buffers);
    assert_eq!(pool.ids(MemberKind::Parameters), [w]);
    assert_eq!(pool.ids(MemberKind::Buffers), [running]);
    assert_eq!(pool.value(w).shape(), &[4, 3]);
    assert_eq!(w.to_string(), "#0");
}

#[test]
fn test_seeded_init_is_deterministic() {
    let mut a = ParamPool::new(Some(7));
    let mut b = ParamPool::new(Some(7));
    let ia = a.register_parameter(&[5, 5], Init::Xavier);
    let ib = b.register_parameter(&[5, 5], Init::Xavier);
    assert_eq!(a.value(ia), b.value(ib));
    let c = a.register_parameter(&[3], Init::Constant(0.5));
    assert_eq!(a.value(c), &Tensor::new(&[0.5; 3], &[3]));
}

#[test]
fn test_grad_bookkeeping() {
    let mut pool = ParamPool::new(Some(1));
    let w = pool.register_parameter(&[2], Init::Zeros);
    let running = pool.register_buffer(Tensor::zeros(&[2]));
    assert!(pool.grad(w).is_none());

    pool.accumulate_grad(w, &Tensor::ones(&[2])).unwrap();
    pool.accumulate_grad(w, &Tensor::ones(&[2])).unwrap();
    assert_eq!(pool.grad(w), Some(&Tensor::new(&[2., 2.], &[2])));

    // 缓冲区的梯度累加被忽略，直接设置则报错
    pool.accumulate_grad(running, &Tensor::ones(&[2])).unwrap();
    assert!(pool.grad(running).is_none());
    assert_err!(
        pool.set_grad(running, Some(Tensor::ones(&[2]))),
        NasError::Computation(_)
    );
    assert_err!(pool.set_grad(w, Some(Tensor::ones(&[3]))), NasError::Computation(_));
    assert_err!(pool.accumulate_grad(w, &Tensor::ones(&[3])), NasError::Computation(_));

    pool.zero_grad([w]);
    assert!(pool.grad(w).is_none());
    pool.set_grad(w, Some(Tensor::ones(&[2]))).unwrap();
    pool.zero_grad_all();
    assert!(pool.grad(w).is_none());
}

#[test]
fn test_assign_keeps_shape() {
    let mut pool = ParamPool::new(Some(1));
    let w = pool.register_parameter(&[2], Init::Zeros);
    pool.assign(w, &Tensor::new(&[1., 2.], &[2])).unwrap();
    assert_eq!(pool.value(w), &Tensor::new(&[1., 2.], &[2]));
    assert_err!(pool.assign(w, &Tensor::ones(&[3])), NasError::Tensor(_));
}

#[test]
fn test_member_kind_from_str() {
    assert_eq!("parameters".parse::<MemberKind>().unwrap(), MemberKind::Parameters);
    assert_eq!("buffers".parse::<MemberKind>().unwrap(), MemberKind::Buffers);
    assert_err!("weights".parse::<MemberKind>(), NasError::Config(_));
}

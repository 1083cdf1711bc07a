use crate::assert_panic;
use crate::tensor::Tensor;
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn test_new() {
    let tensor = Tensor::new(&[1., 2., 3., 4., 5., 6.], &[2, 3]);
    assert_eq!(tensor.shape(), &[2, 3]);
    assert_eq!(tensor.size(), 6);
    assert_eq!(tensor.dimension(), 2);
    assert_eq!(tensor.data_as_slice(), &[1., 2., 3., 4., 5., 6.]);

    // 数据长度与形状不匹配
    assert_panic!(Tensor::new(&[1., 2., 3.], &[2, 2]));
}

#[test]
fn test_zeros_and_ones() {
    let zeros = Tensor::zeros(&[2, 1, 3]);
    assert!(zeros.to_vec().iter().all(|&x| x == 0.));
    let ones = Tensor::ones(&[4]);
    assert_eq!(ones.sum(), 4.);
    assert!(Tensor::zeros_like(&ones).is_same_shape(&ones));
}

#[test]
fn test_number() {
    assert_eq!(Tensor::new(&[3.5], &[1, 1]).number(), Some(3.5));
    assert_eq!(Tensor::from(2.).number(), Some(2.));
    assert_eq!(Tensor::new(&[1., 2.], &[2]).number(), None);
}

#[test]
fn test_random_with_seed_is_deterministic() {
    let mut rng_1 = StdRng::seed_from_u64(7);
    let mut rng_2 = StdRng::seed_from_u64(7);
    let a = Tensor::normal_with_rng(0., 1., &[3, 5], &mut rng_1);
    let b = Tensor::normal_with_rng(0., 1., &[3, 5], &mut rng_2);
    assert_eq!(a, b);

    let u = Tensor::uniform_with_rng(-0.5, 0.5, &[100], &mut rng_1);
    assert!(u.to_vec().iter().all(|&x| (-0.5..=0.5).contains(&x)));
}

/*
 * @Description  : 错误类型：张量层使用`TensorError`，超网/候选网络层使用`NasError`
 */

use thiserror::Error;
mod nas;
mod ops;
pub use self::nas::*;
pub use self::ops::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
    // 张量二元运算
    #[error(
        "形状不一致，故无法{operator}：第一个张量的形状为{tensor1_shape:?}，第二个张量的形状为{tensor2_shape:?}"
    )]
    OperatorError {
        operator: Operator,
        tensor1_shape: Vec<usize>,
        tensor2_shape: Vec<usize>,
    },
    #[error("数据长度{data_len}与形状{shape:?}不匹配")]
    DataShapeMismatch { data_len: usize, shape: Vec<usize> },
    #[error("维度{axis}超出了张量的阶数{dimension}")]
    AxisOutOfRange { axis: usize, dimension: usize },
    #[error("区间[{start}, {end})超出了第{axis}维的长度{len}")]
    RangeOutOfBounds {
        axis: usize,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("张量列表为空")]
    EmptyList,
    #[error("张量形状不一致")]
    InconsistentShape,
    #[error("张量形状不兼容")]
    IncompatibleShape,
}

/*
 * @Description  : Layer 模块：只持有参数池中的`ParamId`，前向计算落在计算图上
 */

mod batch_norm;
mod composite;
mod conv;
mod linear;
mod primitive;

#[cfg(test)]
mod tests;

pub use batch_norm::BatchNorm2d;
pub use composite::{ConvBn, ReluConvBn};
pub use conv::Conv1x1;
pub use linear::Linear;
pub use primitive::{
    AvgPool3x3, Identity, PRIMITIVES, Primitive, PrimitiveOp, Zero, build_primitive,
};

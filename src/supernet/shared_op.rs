/*
 * @Description  : 共享边（SharedOp）：一条边上同时持有全部候选原语，按名称选择其一执行
 */

use super::context::ForwardContext;
use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::layer::{Primitive, PrimitiveOp, build_primitive};
use crate::nn::module::{Module, NamedMembers, join_name};
use crate::nn::pool::{MemberKind, ParamPool};

pub struct SharedOp {
    primitives: Vec<String>,
    p_ops: Vec<PrimitiveOp>,
}

impl SharedOp {
    pub fn new(
        primitives: &[String],
        channels: usize,
        affine: bool,
        pool: &mut ParamPool,
    ) -> Result<Self, NasError> {
        let p_ops = primitives
            .iter()
            .map(|name| build_primitive(name, channels, channels, affine, pool))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            primitives: primitives.to_vec(),
            p_ops,
        })
    }

    fn index_of(&self, op_type: &str) -> Result<usize, NasError> {
        self.primitives
            .iter()
            .position(|p| p == op_type)
            .ok_or_else(|| NasError::UnknownPrimitive(op_type.to_string()))
    }

    pub fn forward(&self, graph: &mut Graph, x: NodeId, op_type: &str) -> Result<NodeId, NasError> {
        let index = self.index_of(op_type)?;
        self.p_ops[index].forward(graph, x)
    }

    /// 原语本身不可再分，一次调用即完成整条边：输出记入`previous_op`并标记`is_end_of_op`
    pub fn forward_one_step(
        &self,
        context: &mut ForwardContext,
        x: NodeId,
        op_type: &str,
    ) -> Result<NodeId, NasError> {
        let out = self.forward(&mut context.graph, x, op_type)?;
        let (op_ind, _) = context.next_op_index;
        context.previous_op.push(out);
        context.next_op_index = (op_ind + 1, 0);
        context.is_end_of_op = true;
        Ok(out)
    }

    /// 只枚举`op_type`对应的那一个原语的成员
    pub fn sub_named_members(
        &self,
        op_type: &str,
        prefix: &str,
        kind: MemberKind,
    ) -> Result<NamedMembers, NasError> {
        let index = self.index_of(op_type)?;
        Ok(self.p_ops[index].named_members(kind, &join_name(prefix, &format!("p_ops.{index}"))))
    }
}

impl Module for SharedOp {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        self.p_ops
            .iter()
            .enumerate()
            .flat_map(|(i, op)| op.named_members(kind, &join_name(prefix, &format!("p_ops.{i}"))))
            .collect()
    }
}

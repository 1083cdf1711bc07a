/*
 * @Description  : 共享单元（SharedCell）：单元内所有可能的边`from < to`都持有一条共享边，
 *                 由基因型选出实际参与计算的边及其原语
 */

use super::context::ForwardContext;
use super::shared_op::SharedOp;
use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::layer::ReluConvBn;
use crate::nn::module::{Module, NamedMembers, join_name};
use crate::nn::pool::{MemberKind, ParamPool};
use crate::search_space::{Edge, GroupedGenotype};
use std::collections::{BTreeMap, BTreeSet};

pub struct SharedCell {
    num_init: usize,
    num_steps: usize,
    use_preprocess: bool,
    /// 每个输入节点一个预处理层，把输入通道变换到单元的通道数
    preprocess_ops: Vec<ReluConvBn>,
    /// `(from, to)` -> 共享边
    edges: BTreeMap<(usize, usize), SharedOp>,
    num_out_channels: usize,
}

impl SharedCell {
    pub fn new(
        num_init: usize,
        num_steps: usize,
        primitives: &[String],
        in_channels: &[usize],
        num_out_channels: usize,
        use_preprocess: bool,
        pool: &mut ParamPool,
    ) -> Result<Self, NasError> {
        assert_eq!(num_init, in_channels.len());
        let preprocess_ops = if use_preprocess {
            in_channels
                .iter()
                .map(|&c| ReluConvBn::new(pool, c, num_out_channels, false))
                .collect()
        } else {
            if let Some(&c) = in_channels.iter().find(|&&c| c != num_out_channels) {
                return Err(NasError::Config(format!(
                    "关闭预处理时输入通道数{c}必须等于单元通道数{num_out_channels}"
                )));
            }
            Vec::new()
        };

        let mut edges = BTreeMap::new();
        for to in num_init..num_init + num_steps {
            for from in 0..to {
                let op = SharedOp::new(primitives, num_out_channels, false, pool)?;
                edges.insert((from, to), op);
            }
        }
        Ok(Self {
            num_init,
            num_steps,
            use_preprocess,
            preprocess_ops,
            edges,
            num_out_channels,
        })
    }

    /// 单元输出通道数（最后`num_steps`个节点拼接）
    pub const fn out_channels(&self) -> usize {
        self.num_out_channels * self.num_steps
    }

    fn edge(&self, edge: &Edge) -> Result<&SharedOp, NasError> {
        self.edges
            .get(&(edge.from, edge.to))
            .ok_or_else(|| NasError::InvalidGenotype(format!("单元中不存在边{edge}")))
    }

    fn preprocess(&self, graph: &mut Graph, index: usize, x: NodeId) -> Result<NodeId, NasError> {
        if self.use_preprocess {
            self.preprocess_ops[index].forward(graph, x)
        } else {
            Ok(x)
        }
    }

    fn concat_last_steps(&self, graph: &mut Graph, states: &[NodeId]) -> Result<NodeId, NasError> {
        let start = states.len().saturating_sub(self.num_steps);
        graph.concat(&states[start..], 1)
    }

    /// 整个单元的前向计算
    ///
    /// # Panics
    /// `inputs`的个数与输入节点数不一致时
    pub fn forward(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        genotype_grouped: &GroupedGenotype,
    ) -> Result<NodeId, NasError> {
        assert_eq!(self.num_init, inputs.len());
        let mut states = Vec::with_capacity(self.num_init + self.num_steps);
        for (i, &x) in inputs.iter().enumerate() {
            states.push(self.preprocess(graph, i, x)?);
        }

        for (_, connections) in genotype_grouped {
            let mut outs = Vec::with_capacity(connections.len());
            for edge in connections {
                outs.push(self.edge(edge)?.forward(graph, states[edge.from], &edge.op_type)?);
            }
            states.push(graph.sum(&outs)?);
        }
        self.concat_last_steps(graph, &states)
    }

    /// 推进一个原子单位：一个输入节点的预处理、一条入边、一次节点求和或最后的拼接
    pub fn forward_one_step(
        &self,
        context: &mut ForwardContext,
        genotype_grouped: &GroupedGenotype,
    ) -> Result<NodeId, NasError> {
        let (layer, cur_step) = context.next_step_index;
        context.reset_flags();

        let state = if cur_step < self.num_init {
            // 历史不足时取最早的输出
            let ind = context
                .previous_cells
                .len()
                .saturating_sub(self.num_init - cur_step);
            let input = context.previous_cells[ind];
            let state = self.preprocess(&mut context.graph, cur_step, input)?;
            context.current_cell.push(state);
            context.next_step_index = (layer, cur_step + 1);
            context.is_end_of_op = true;
            context.is_end_of_step = true;
            state
        } else if cur_step < self.num_init + self.num_steps {
            let (to, connections) = genotype_grouped
                .get(cur_step - self.num_init)
                .ok_or_else(|| {
                    NasError::InvalidGenotype(format!("节点{cur_step}没有入边"))
                })?;
            let (op_ind, _) = context.next_op_index;
            if op_ind == connections.len() {
                // 所有入边都已计算，求和得到节点状态
                let state = context.graph.sum(&context.previous_op)?;
                context.current_cell.push(state);
                context.previous_op.clear();
                context.next_op_index = (0, 0);
                context.next_step_index = (layer, cur_step + 1);
                context.is_end_of_op = true;
                context.is_end_of_step = true;
                log::trace!("第{layer}层节点{to}完成");
                state
            } else {
                let edge = &connections[op_ind];
                let input = context.current_cell[edge.from];
                self.edge(edge)?
                    .forward_one_step(context, input, &edge.op_type)?
            }
        } else {
            let state = self.concat_last_steps(&mut context.graph, &context.current_cell)?;
            context.current_cell.clear();
            context.previous_cells.push(state);
            context.next_step_index = (layer + 1, 0);
            context.is_end_of_op = true;
            context.is_end_of_step = true;
            context.is_end_of_cell = true;
            log::trace!("第{layer}层单元完成");
            state
        };
        Ok(state)
    }

    /// 基因型实际用到的成员：每条边只取其选定的原语；
    /// `check_visited`时只保留被基因型引用为输入的预处理层
    pub fn sub_named_members(
        &self,
        genotype: &[Edge],
        prefix: &str,
        kind: MemberKind,
        check_visited: bool,
    ) -> Result<NamedMembers, NasError> {
        let all_from = genotype.iter().map(|e| e.from).collect::<BTreeSet<_>>();
        let mut members = NamedMembers::new();
        for (i, op) in self.preprocess_ops.iter().enumerate() {
            if !check_visited || all_from.contains(&i) {
                members.extend(op.named_members(kind, &join_name(prefix, &format!("preprocess_ops.{i}"))));
            }
        }
        for edge in genotype {
            let edge_prefix = join_name(prefix, &format!("edge_mod.f_{}_t_{}", edge.from, edge.to));
            members.extend(self.edge(edge)?.sub_named_members(&edge.op_type, &edge_prefix, kind)?);
        }
        Ok(members)
    }
}

impl Module for SharedCell {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        let preprocess = self.preprocess_ops.iter().enumerate().flat_map(|(i, op)| {
            op.named_members(kind, &join_name(prefix, &format!("preprocess_ops.{i}")))
        });
        let edges = self.edges.iter().flat_map(|((from, to), op)| {
            op.named_members(kind, &join_name(prefix, &format!("edge_mod.f_{from}_t_{to}")))
        });
        preprocess.chain(edges).collect()
    }
}

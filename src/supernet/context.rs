/*
 * @Description  : 逐步前向（step-wise forward）的上下文
 *
 * 上下文持有正在构建的计算图与遍历状态，由驱动逐步前向的那一个调用方独占；
 * 每次调用`forward_one_step`推进一个原子单位，并重新设置三个边界标志。
 */

use crate::nn::graph::{Graph, NodeId};
use crate::tensor::Tensor;

pub struct ForwardContext {
    pub(super) graph: Graph,
    /// 已完成的单元输出（首个元素为主干输出，网络头的输出也追加在此）
    pub(super) previous_cells: Vec<NodeId>,
    /// 当前单元中已完成的节点状态
    pub(super) current_cell: Vec<NodeId>,
    /// 当前节点已经计算过的入边输出
    pub(super) previous_op: Vec<NodeId>,
    /// 下一次调用要处理的`(层, 单元内的步)`
    pub(super) next_step_index: (usize, usize),
    /// 下一次调用要处理的`(当前节点的第几条入边, 该边原语内部的子步)`
    pub(super) next_op_index: (usize, usize),
    pub(super) is_end_of_op: bool,
    pub(super) is_end_of_step: bool,
    pub(super) is_end_of_cell: bool,
    pub(super) last_state: NodeId,
}

impl ForwardContext {
    pub(super) fn new(graph: Graph, stem: NodeId) -> Self {
        Self {
            graph,
            previous_cells: vec![stem],
            current_cell: Vec::new(),
            previous_op: Vec::new(),
            next_step_index: (0, 0),
            next_op_index: (0, 0),
            is_end_of_op: true,
            is_end_of_step: true,
            is_end_of_cell: true,
            last_state: stem,
        }
    }

    pub(super) fn reset_flags(&mut self) {
        self.is_end_of_op = false;
        self.is_end_of_step = false;
        self.is_end_of_cell = false;
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// 供回调在图上追加运算（如对中间状态施加额外的损失）
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// 图中某个节点的值
    pub fn value(&self, node: NodeId) -> &Tensor {
        self.graph.value(node)
    }

    pub fn previous_cells(&self) -> &[NodeId] {
        &self.previous_cells
    }

    pub fn current_cell(&self) -> &[NodeId] {
        &self.current_cell
    }

    pub fn previous_op(&self) -> &[NodeId] {
        &self.previous_op
    }

    pub const fn next_step_index(&self) -> (usize, usize) {
        self.next_step_index
    }

    pub const fn next_op_index(&self) -> (usize, usize) {
        self.next_op_index
    }

    pub const fn is_end_of_op(&self) -> bool {
        self.is_end_of_op
    }

    pub const fn is_end_of_step(&self) -> bool {
        self.is_end_of_step
    }

    pub const fn is_end_of_cell(&self) -> bool {
        self.is_end_of_cell
    }

    /// 最近一次调用产生的状态
    pub const fn last_state(&self) -> NodeId {
        self.last_state
    }
}

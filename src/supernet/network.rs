/*
 * @Description  : 超网（SuperNet）：主干 + 单元堆叠 + 分类头，持有所有边上的全部原语，即共享权重池
 */

use super::config::SuperNetConfig;
use super::context::ForwardContext;
use super::manager::WeightsManager;
use super::shared_cell::SharedCell;
use super::state_dict::StateDict;
use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::layer::{ConvBn, Linear};
use crate::nn::module::{Module, NamedMembers, dedup_members, join_name};
use crate::nn::pool::{MemberKind, ParamPool, PoolHandle};
use crate::search_space::{Genotype, GroupedGenotype, SearchSpace};
use crate::tensor::Tensor;
use std::cell::Cell;
use std::collections::BTreeSet;

pub struct SuperNet {
    pool: PoolHandle,
    config: SuperNetConfig,
    search_space: SearchSpace,
    stem: ConvBn,
    cells: Vec<SharedCell>,
    classifier: Linear,
    /// 训练/评估模式，由所有派生出的候选网络共享
    training: Cell<bool>,
}

impl SuperNet {
    pub fn new(config: &SuperNetConfig) -> Result<Self, NasError> {
        let search_space = SearchSpace::from_config(&config.search_space)?;
        if config.in_channels == 0 || config.num_classes == 0 || config.init_channels == 0 {
            return Err(NasError::Config(format!(
                "in_channels({})、num_classes({})与init_channels({})都必须大于0",
                config.in_channels, config.num_classes, config.init_channels
            )));
        }
        if config.stem_multiplier == 0 {
            return Err(NasError::Config("stem_multiplier必须大于0".to_string()));
        }
        if !<Self as WeightsManager>::supported_rollout_types().contains(&config.rollout_type) {
            return Err(NasError::UnsupportedRolloutType(
                config.rollout_type.to_string(),
            ));
        }

        let mut pool = ParamPool::new(config.seed);
        let num_init = search_space.num_init_nodes();
        let stem_channels = config.init_channels * config.stem_multiplier;
        let stem = ConvBn::new(&mut pool, config.in_channels, stem_channels, config.stem_affine);

        // 每个单元的输入来自前`num_init`个单元（不足时由主干补齐）
        let mut prev_channels = vec![stem_channels; num_init];
        let mut channels = config.init_channels;
        let mut cells = Vec::with_capacity(search_space.num_layers());
        for i_layer in 0..search_space.num_layers() {
            if search_space.is_reduce_cell(i_layer) {
                channels *= 2;
            }
            let cell = SharedCell::new(
                num_init,
                search_space.num_steps(),
                search_space.primitives(),
                &prev_channels,
                channels,
                config.cell_use_preprocess,
                &mut pool,
            )?;
            prev_channels.remove(0);
            prev_channels.push(cell.out_channels());
            cells.push(cell);
        }

        let last_channels = cells
            .last()
            .map_or(stem_channels, |cell| cell.out_channels());
        let classifier = Linear::new(&mut pool, last_channels, config.num_classes, true);

        log::debug!(
            "超网构建完成：{}层，{}个张量，单元组布局{:?}",
            cells.len(),
            pool.len(),
            search_space.cell_layout()
        );
        Ok(Self {
            pool: pool.into_handle(),
            config: config.clone(),
            search_space,
            stem,
            cells,
            classifier,
            training: Cell::new(true),
        })
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    pub fn config(&self) -> &SuperNetConfig {
        &self.config
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.search_space
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn is_training(&self) -> bool {
        self.training.get()
    }

    pub fn set_training(&self, training: bool) {
        self.training.set(training);
    }

    fn cell_genotype<'g>(
        &self,
        genotypes_grouped: &'g [GroupedGenotype],
        cell_idx: usize,
    ) -> Result<&'g GroupedGenotype, NasError> {
        let group = self.search_space.cell_layout()[cell_idx];
        genotypes_grouped.get(group).ok_or_else(|| {
            NasError::InvalidGenotype(format!("缺少单元组{group}的基因型"))
        })
    }

    fn head(&self, graph: &mut Graph, x: NodeId) -> Result<NodeId, NasError> {
        let pooled = graph.global_avg_pool(x)?;
        self.classifier.forward(graph, pooled)
    }

    /// 整网前向：`genotypes_grouped`按单元组顺序给出每组的分组基因型
    pub fn forward(
        &self,
        graph: &mut Graph,
        inputs: NodeId,
        genotypes_grouped: &[GroupedGenotype],
    ) -> Result<NodeId, NasError> {
        let stem = self.stem.forward(graph, inputs)?;
        let mut states = vec![stem; self.search_space.num_init_nodes()];
        for (cell_idx, cell) in self.cells.iter().enumerate() {
            let grouped = self.cell_genotype(genotypes_grouped, cell_idx)?;
            let out = cell.forward(graph, &states, grouped)?;
            states.remove(0);
            states.push(out);
        }
        let last = *states
            .last()
            .ok_or_else(|| NasError::Computation("网络没有任何状态".to_string()))?;
        self.head(graph, last)
    }

    /// 逐步前向：`context`为None时由`inputs`开始一次新的前向（只计算主干），
    /// 否则从上下文记录的位置推进一个原子单位。返回本次产生的状态与更新后的上下文
    pub fn forward_one_step(
        &self,
        context: Option<ForwardContext>,
        inputs: Option<&Tensor>,
        genotypes_grouped: &[GroupedGenotype],
    ) -> Result<(NodeId, ForwardContext), NasError> {
        let Some(mut context) = context else {
            let inputs = inputs.ok_or_else(|| {
                NasError::UnsupportedOperation("开始逐步前向时必须提供输入".to_string())
            })?;
            let mut graph = Graph::new(self.pool.clone(), self.is_training(), true);
            let x = graph.input(inputs);
            let stem = self.stem.forward(&mut graph, x)?;
            log::trace!("逐步前向开始：主干输出形状{:?}", graph.value(stem).shape());
            return Ok((stem, ForwardContext::new(graph, stem)));
        };
        if inputs.is_some() {
            log::warn!("逐步前向已有上下文，忽略传入的输入");
        }

        let (layer, _) = context.next_step_index;
        let num_layers = self.num_layers();
        let state = if layer < num_layers {
            let grouped = self.cell_genotype(genotypes_grouped, layer)?;
            self.cells[layer].forward_one_step(&mut context, grouped)?
        } else if layer == num_layers {
            context.reset_flags();
            let last = *context
                .previous_cells
                .last()
                .ok_or_else(|| NasError::Computation("网络没有任何状态".to_string()))?;
            let out = self.head(&mut context.graph, last)?;
            context.previous_cells.push(out);
            context.next_step_index = (num_layers + 1, 0);
            context.is_end_of_op = true;
            context.is_end_of_step = true;
            context.is_end_of_cell = true;
            log::trace!("逐步前向到达分类头");
            out
        } else {
            return Err(NasError::UnsupportedOperation(
                "逐步前向已经结束，请用新的上下文重新开始".to_string(),
            ));
        };
        context.last_state = state;
        Ok((state, context))
    }

    /// 以固定的步数驱动逐步前向，每次调用后都把`(状态, 上下文)`交给回调
    pub fn forward_one_step_callback<F>(
        &self,
        inputs: &Tensor,
        genotypes_grouped: &[GroupedGenotype],
        mut callback: F,
    ) -> Result<(NodeId, ForwardContext), NasError>
    where
        F: FnMut(NodeId, &mut ForwardContext) -> Result<(), NasError>,
    {
        let (mut state, mut context) = self.forward_one_step(None, Some(inputs), genotypes_grouped)?;
        callback(state, &mut context)?;
        let steps_per_cell =
            self.search_space.num_init_nodes() + self.search_space.num_steps() + 1;
        for _ in 0..self.num_layers() {
            for _ in 0..steps_per_cell {
                loop {
                    (state, context) = self.forward_one_step(Some(context), None, genotypes_grouped)?;
                    callback(state, &mut context)?;
                    if context.is_end_of_step || context.is_end_of_cell {
                        break;
                    }
                }
            }
        }
        (state, context) = self.forward_one_step(Some(context), None, genotypes_grouped)?;
        callback(state, &mut context)?;
        Ok((state, context))
    }

    /// 由最后一个单元出发，沿单元组基因型中指向输入节点的边反向搜索，得到实际参与计算的单元
    fn visited_cells(&self, genotypes: &[Genotype]) -> BTreeSet<usize> {
        let num_init = self.search_space.num_init_nodes();
        // 依赖集合按单元组计算，同组的所有单元共用
        let depends = genotypes
            .iter()
            .map(|genotype| {
                genotype
                    .iter()
                    .map(|edge| edge.from)
                    .filter(|&from| from < num_init)
                    .collect::<BTreeSet<_>>()
            })
            .collect::<Vec<_>>();

        let mut visited = BTreeSet::new();
        let Some(last) = self.num_layers().checked_sub(1) else {
            return visited;
        };
        let mut stack = vec![last];
        while let Some(cell_idx) = stack.pop() {
            if !visited.insert(cell_idx) {
                continue;
            }
            let group = self.search_space.cell_layout()[cell_idx];
            let Some(depend) = depends.get(group) else {
                continue;
            };
            for &from in depend {
                if let Some(depend_cell) = (cell_idx + from).checked_sub(num_init) {
                    if !visited.contains(&depend_cell) {
                        stack.push(depend_cell);
                    }
                }
            }
        }
        visited
    }

    /// 某组基因型激活的成员：主干与分类头总是包含在内，
    /// 之后按单元序号依次列出各单元被选中的预处理层与原语
    pub fn sub_named_members(
        &self,
        genotypes: &[Genotype],
        prefix: &str,
        kind: MemberKind,
        check_visited: bool,
    ) -> Result<NamedMembers, NasError> {
        let mut members = self.stem.named_members(kind, &join_name(prefix, "stem"));
        members.extend(self.classifier.named_members(kind, &join_name(prefix, "classifier")));

        let cell_indices: Vec<usize> = if check_visited {
            self.visited_cells(genotypes).into_iter().collect()
        } else {
            (0..self.num_layers()).collect()
        };
        for cell_idx in cell_indices {
            let group = self.search_space.cell_layout()[cell_idx];
            let genotype = genotypes.get(group).ok_or_else(|| {
                NasError::InvalidGenotype(format!("缺少单元组{group}的基因型"))
            })?;
            members.extend(self.cells[cell_idx].sub_named_members(
                genotype,
                &join_name(prefix, &format!("cells.{cell_idx}")),
                kind,
                check_visited,
            )?);
        }
        Ok(members)
    }

    /// 全部参数与缓冲区（按名称去重后）组成的状态字典
    pub fn state_dict(&self) -> Result<StateDict, NasError> {
        let mut members = dedup_members(self.named_parameters(""));
        members.extend(dedup_members(self.named_buffers("")));
        let pool = self.pool.borrow();
        Ok(StateDict::from_members(&pool, &members))
    }

    /// 把状态字典载入全部成员；`strict`时两边的名称集合必须完全一致
    pub fn load_state_dict(&self, state_dict: &StateDict, strict: bool) -> Result<(), NasError> {
        let mut members = dedup_members(self.named_parameters(""));
        members.extend(dedup_members(self.named_buffers("")));
        let mut pool = self.pool.borrow_mut();
        state_dict.load_into(&mut pool, &members, strict)
    }
}

impl Module for SuperNet {
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
        let mut members = self.stem.named_members(kind, &join_name(prefix, "stem"));
        for (i, cell) in self.cells.iter().enumerate() {
            members.extend(cell.named_members(kind, &join_name(prefix, &format!("cells.{i}"))));
        }
        members.extend(self.classifier.named_members(kind, &join_name(prefix, "classifier")));
        members
    }
}

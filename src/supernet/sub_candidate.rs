/*
 * @Description  : 超网上的候选网络（SubCandidateNet）：以一次 rollout 为参数的轻量视图
 */

use super::candidate::{CandidateNet, Mode};
use super::context::ForwardContext;
use super::network::SuperNet;
use super::state_dict::StateDict;
use super::virtual_scope::VirtualGuard;
use crate::errors::NasError;
use crate::nn::graph::{Graph, NodeId};
use crate::nn::module::{Module, NamedMembers, dedup_members};
use crate::nn::pool::{MemberKind, PoolHandle};
use crate::search_space::{Genotype, GroupedGenotype, Rollout, group_and_sort_by_to_node};
use crate::tensor::Tensor;
use std::cell::OnceCell;

pub struct SubCandidateNet<'a> {
    super_net: &'a SuperNet,
    rollout: Rollout,
    /// 单元基因型（已剔除`concat`条目），按单元组顺序
    genotypes: Vec<Genotype>,
    genotypes_grouped: Vec<GroupedGenotype>,
    devices: Vec<usize>,
    member_mask: bool,
    check_visited: bool,
    cache_named_members: bool,
    virtual_parameter_only: bool,
    cached_parameters: OnceCell<NamedMembers>,
    cached_buffers: OnceCell<NamedMembers>,
}

impl<'a> SubCandidateNet<'a> {
    /// 由超网配置中的`candidate_*`选项构造；基因型的合法性由调用方保证
    pub(super) fn new(super_net: &'a SuperNet, rollout: &Rollout) -> Self {
        let config = super_net.config();
        let genotypes = rollout.cell_genotypes();
        let genotypes_grouped = genotypes
            .iter()
            .map(|genotype| group_and_sort_by_to_node(genotype))
            .collect();
        Self {
            super_net,
            rollout: rollout.clone(),
            genotypes,
            genotypes_grouped,
            devices: config.devices.clone(),
            member_mask: config.candidate_member_mask,
            check_visited: config.candidate_check_visited,
            cache_named_members: config.candidate_cache_named_members,
            virtual_parameter_only: config.candidate_virtual_parameter_only,
            cached_parameters: OnceCell::new(),
            cached_buffers: OnceCell::new(),
        }
    }

    pub fn super_net(&self) -> &'a SuperNet {
        self.super_net
    }

    pub fn rollout(&self) -> &Rollout {
        &self.rollout
    }

    pub fn genotypes(&self) -> &[Genotype] {
        &self.genotypes
    }

    pub fn genotypes_grouped(&self) -> &[GroupedGenotype] {
        &self.genotypes_grouped
    }

    pub fn devices(&self) -> &[usize] {
        &self.devices
    }

    /// 本候选网络激活的成员（不受`member_mask`影响）
    pub fn active_members(&self, kind: MemberKind) -> Result<NamedMembers, NasError> {
        let cache = match kind {
            MemberKind::Parameters => &self.cached_parameters,
            MemberKind::Buffers => &self.cached_buffers,
        };
        if let Some(members) = cache.get() {
            return Ok(members.clone());
        }
        let members = dedup_members(self.super_net.sub_named_members(
            &self.genotypes,
            "",
            kind,
            self.check_visited,
        )?);
        if self.cache_named_members {
            // 缓存只会设置一次，第一次的结果即为最终结果
            let _ = cache.set(members.clone());
        }
        Ok(members)
    }

    /// 可见成员：开启`member_mask`时为激活成员，否则为超网的全部成员
    pub fn named_members(&self, kind: MemberKind) -> Result<NamedMembers, NasError> {
        if self.member_mask {
            self.active_members(kind)
        } else {
            Ok(dedup_members(self.super_net.named_members(kind, "")))
        }
    }

    /// 虚拟上下文保存的成员：前向会经过的全部成员。
    /// `check_visited`剪掉的单元与预处理层仍会参与前向（训练模式下其BN缓冲区会被更新），
    /// 因此这里按未剪枝的激活成员保存
    fn virtual_members(&self) -> Result<NamedMembers, NasError> {
        let members_of = |kind: MemberKind| -> Result<NamedMembers, NasError> {
            if self.member_mask && self.check_visited {
                Ok(dedup_members(self.super_net.sub_named_members(
                    &self.genotypes,
                    "",
                    kind,
                    false,
                )?))
            } else {
                self.named_members(kind)
            }
        };
        let mut members = members_of(MemberKind::Parameters)?;
        if !self.virtual_parameter_only {
            members.extend(members_of(MemberKind::Buffers)?);
        }
        Ok(members)
    }

    /// 激活参数在前、激活缓冲区在后的状态字典
    pub fn state_dict(&self) -> Result<StateDict, NasError> {
        let mut members = self.active_members(MemberKind::Parameters)?;
        members.extend(self.active_members(MemberKind::Buffers)?);
        Ok(StateDict::from_members(&self.super_net.pool().borrow(), &members))
    }

    /// 把状态字典载入激活成员
    pub fn load_state_dict(&self, state_dict: &StateDict, strict: bool) -> Result<(), NasError> {
        let mut members = self.active_members(MemberKind::Parameters)?;
        members.extend(self.active_members(MemberKind::Buffers)?);
        state_dict.load_into(&mut self.super_net.pool().borrow_mut(), &members, strict)
    }

    /// 逐步前向，见`SuperNet::forward_one_step`；多副本时不支持
    pub fn forward_one_step(
        &self,
        context: Option<ForwardContext>,
        inputs: Option<&Tensor>,
    ) -> Result<(NodeId, ForwardContext), NasError> {
        if self.devices.len() > 1 {
            return Err(NasError::UnsupportedOperation(format!(
                "逐步前向不支持多副本（当前{}个）",
                self.devices.len()
            )));
        }
        self.super_net
            .forward_one_step(context, inputs, &self.genotypes_grouped)
    }

    /// 带回调的逐步前向，见`SuperNet::forward_one_step_callback`；多副本时不支持
    pub fn forward_one_step_callback<F>(
        &self,
        inputs: &Tensor,
        callback: F,
    ) -> Result<(NodeId, ForwardContext), NasError>
    where
        F: FnMut(NodeId, &mut ForwardContext) -> Result<(), NasError>,
    {
        if self.devices.len() > 1 {
            return Err(NasError::UnsupportedOperation(format!(
                "逐步前向不支持多副本（当前{}个）",
                self.devices.len()
            )));
        }
        self.super_net
            .forward_one_step_callback(inputs, &self.genotypes_grouped, callback)
    }
}

impl CandidateNet for SubCandidateNet<'_> {
    fn pool(&self) -> &PoolHandle {
        self.super_net.pool()
    }

    fn mode(&self) -> Mode {
        if self.super_net.is_training() {
            Mode::Train
        } else {
            Mode::Eval
        }
    }

    fn set_mode(&self, mode: Mode) {
        self.super_net.set_training(mode.is_train());
    }

    fn forward(&self, graph: &mut Graph, inputs: &Tensor, single: bool) -> Result<NodeId, NasError> {
        if single || self.devices.len() <= 1 {
            let x = graph.input(inputs);
            return self.super_net.forward(graph, x, &self.genotypes_grouped);
        }
        // 数据并行：按副本数切分批次，依次计算后沿批维拼接；
        // BN滑动统计量只由第一个副本更新，一次前向只更新一次
        let chunks = inputs.split_batch(self.devices.len())?;
        let update_running_stats = graph.is_updating_running_stats();
        let outputs = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                graph.set_update_running_stats(update_running_stats && i == 0);
                let x = graph.input(chunk);
                self.super_net.forward(graph, x, &self.genotypes_grouped)
            })
            .collect::<Result<Vec<_>, _>>();
        graph.set_update_running_stats(update_running_stats);
        graph.concat(&outputs?, 0)
    }

    fn named_parameters(&self) -> Result<NamedMembers, NasError> {
        self.named_members(MemberKind::Parameters)
    }

    fn named_buffers(&self) -> Result<NamedMembers, NasError> {
        self.named_members(MemberKind::Buffers)
    }

    fn begin_virtual(&self) -> Result<VirtualGuard<'_>, NasError> {
        VirtualGuard::new(self.pool().clone(), move || self.virtual_members())
    }
}

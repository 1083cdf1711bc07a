/*
 * @Description  : 权重管理器（WeightsManager）：外层搜索循环与共享权重之间的接口
 */

use super::candidate::CandidateNet;
use super::network::SuperNet;
use super::state_dict::StateDict;
use super::sub_candidate::SubCandidateNet;
use crate::errors::NasError;
use crate::nn::module::{Module, dedup_members};
use crate::nn::optimizer::{Optimizer, clip_grad_norm};
use crate::search_space::{Rollout, RolloutType};
use crate::tensor::Tensor;
use std::collections::HashMap;
use std::path::Path;

pub trait WeightsManager {
    type Candidate<'a>: CandidateNet
    where
        Self: 'a;

    /// 由 rollout 组装候选网络
    fn assemble_candidate(&self, rollout: &Rollout) -> Result<Self::Candidate<'_>, NasError>;

    /// 把外部计算好的梯度按名称写回，裁剪后用`optimizer`更新一步
    fn step(
        &self,
        gradients: &[(String, Tensor)],
        optimizer: &mut dyn Optimizer,
    ) -> Result<(), NasError>;

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NasError>;

    fn load<P: AsRef<Path>>(&self, path: P) -> Result<(), NasError>;

    fn rollout_type(&self) -> RolloutType;

    fn supported_rollout_types() -> Vec<RolloutType>;

    fn supported_data_types() -> Vec<&'static str>;
}

impl WeightsManager for SuperNet {
    type Candidate<'a> = SubCandidateNet<'a>;

    fn assemble_candidate(&self, rollout: &Rollout) -> Result<SubCandidateNet<'_>, NasError> {
        if !Self::supported_rollout_types().contains(&rollout.rollout_type()) {
            return Err(NasError::UnsupportedRolloutType(
                rollout.rollout_type().to_string(),
            ));
        }
        let genotypes = rollout.cell_genotypes();
        self.search_space().validate_genotypes(&genotypes)?;
        log::debug!(
            "组装候选网络：{}",
            rollout
                .genotype_list()
                .iter()
                .map(|(label, genotype)| format!(
                    "{label}=[{}]",
                    genotype.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                ))
                .collect::<Vec<_>>()
                .join("; ")
        );
        Ok(SubCandidateNet::new(self, rollout))
    }

    fn step(
        &self,
        gradients: &[(String, Tensor)],
        optimizer: &mut dyn Optimizer,
    ) -> Result<(), NasError> {
        let named = dedup_members(self.named_parameters(""));
        let ids = named.iter().map(|(name, id)| (name.as_str(), *id)).collect::<HashMap<_, _>>();
        let unknown = gradients
            .iter()
            .filter(|(name, _)| !ids.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            return Err(NasError::InvalidParameterSubset(unknown));
        }
        if gradients.is_empty() {
            log::warn!("step收到的梯度列表为空");
        }

        {
            let mut pool = self.pool().borrow_mut();
            pool.zero_grad_all();
            for (name, grad) in gradients {
                pool.set_grad(ids[name.as_str()], Some(grad.clone()))?;
            }
        }
        if let Some(max_norm) = self.config().max_grad_norm {
            let all_ids = named.iter().map(|(_, id)| *id).collect::<Vec<_>>();
            let norm = clip_grad_norm(self.pool(), &all_ids, max_norm)?;
            log::trace!("梯度全局范数：{norm}");
        }
        optimizer.step()
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NasError> {
        let path = path.as_ref();
        let state_dict = self.state_dict()?;
        state_dict.save(path)?;
        log::info!("超网权重已保存到{}（{}个张量）", path.display(), state_dict.len());
        Ok(())
    }

    fn load<P: AsRef<Path>>(&self, path: P) -> Result<(), NasError> {
        let path = path.as_ref();
        let state_dict = StateDict::load(path)?;
        self.load_state_dict(&state_dict, true)?;
        log::info!("已从{}载入超网权重（{}个张量）", path.display(), state_dict.len());
        Ok(())
    }

    fn rollout_type(&self) -> RolloutType {
        self.config().rollout_type
    }

    fn supported_rollout_types() -> Vec<RolloutType> {
        vec![RolloutType::Discrete]
    }

    fn supported_data_types() -> Vec<&'static str> {
        vec!["image"]
    }
}

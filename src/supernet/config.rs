/*
 * @Description  : 超网配置
 */

use crate::errors::NasError;
use crate::search_space::{RolloutType, SearchSpaceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 超网配置（可由JSON反序列化，缺省字段取默认值）
///
/// ```ignore
/// let config = SuperNetConfig::from_json_str(r#"{
///     "search_space": {"num_layers": 5, "num_steps": 2},
///     "init_channels": 8,
///     "seed": 42
/// }"#)?;
/// let super_net = SuperNet::new(&config)?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperNetConfig {
    pub search_space: SearchSpaceConfig,
    pub rollout_type: RolloutType,
    /// 输入图像的通道数
    pub in_channels: usize,
    pub num_classes: usize,
    pub init_channels: usize,
    /// 主干输出通道数 = `init_channels * stem_multiplier`
    pub stem_multiplier: usize,
    /// `WeightsManager::step`中梯度裁剪的全局范数上限；None表示不裁剪
    pub max_grad_norm: Option<f32>,
    pub stem_affine: bool,
    pub cell_use_preprocess: bool,
    /// 数据并行的副本列表；多于1个时整批前向会被切分到各副本上依次计算
    pub devices: Vec<usize>,
    /// 候选网络只枚举激活成员
    pub candidate_member_mask: bool,
    /// 候选网络只枚举从最后一个单元可达的单元及被引用的预处理层
    pub candidate_check_visited: bool,
    /// 候选网络缓存首次计算得到的激活成员
    pub candidate_cache_named_members: bool,
    /// 虚拟上下文只保存/恢复参数，不含缓冲区
    pub candidate_virtual_parameter_only: bool,
    /// 参数初始化的随机种子
    pub seed: Option<u64>,
}

impl Default for SuperNetConfig {
    fn default() -> Self {
        Self {
            search_space: SearchSpaceConfig::default(),
            rollout_type: RolloutType::Discrete,
            in_channels: 3,
            num_classes: 10,
            init_channels: 16,
            stem_multiplier: 3,
            max_grad_norm: Some(5.0),
            stem_affine: true,
            cell_use_preprocess: true,
            devices: Vec::new(),
            candidate_member_mask: true,
            candidate_check_visited: false,
            candidate_cache_named_members: false,
            candidate_virtual_parameter_only: false,
            seed: None,
        }
    }
}

impl SuperNetConfig {
    pub fn from_json_str(json: &str) -> Result<Self, NasError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, NasError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> Result<String, NasError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/*
 * @Description  : 基于单元（cell）的搜索空间
 *
 * 网络由`num_layers`个单元堆叠而成，每个单元属于某个单元组（cell group），
 * 同组单元共享同一个基因型。单元内部有`num_init_nodes`个输入节点与`num_steps`个中间节点，
 * 节点编号依次为`0..num_init_nodes + num_steps`。
 */

mod genotype;

#[cfg(test)]
mod tests;

pub use genotype::{Edge, Genotype, GroupedGenotype, Rollout, RolloutType, group_and_sort_by_to_node};

use crate::errors::NasError;
use crate::nn::layer::PRIMITIVES;
use serde::{Deserialize, Serialize};

/// 搜索空间配置（可由JSON反序列化，缺省字段取默认值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpaceConfig {
    pub num_cell_groups: usize,
    pub num_init_nodes: usize,
    pub num_layers: usize,
    /// 每层所属的单元组；缺省时在`num_layers/3`与`2*num_layers/3`处放置降采样组（组1）
    pub cell_layout: Option<Vec<usize>>,
    pub reduce_cell_groups: Vec<usize>,
    pub num_steps: usize,
    pub shared_primitives: Vec<String>,
}

impl Default for SearchSpaceConfig {
    fn default() -> Self {
        Self {
            num_cell_groups: 2,
            num_init_nodes: 2,
            num_layers: 8,
            cell_layout: None,
            reduce_cell_groups: vec![1],
            num_steps: 4,
            shared_primitives: PRIMITIVES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// 校验后的搜索空间
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    num_cell_groups: usize,
    num_init_nodes: usize,
    num_layers: usize,
    num_steps: usize,
    cell_layout: Vec<usize>,
    reduce_cell_groups: Vec<usize>,
    primitives: Vec<String>,
}

impl SearchSpace {
    pub fn from_config(config: &SearchSpaceConfig) -> Result<Self, NasError> {
        if config.num_init_nodes == 0 || config.num_steps == 0 || config.num_layers == 0 {
            return Err(NasError::Config(format!(
                "num_init_nodes({})、num_steps({})与num_layers({})都必须大于0",
                config.num_init_nodes, config.num_steps, config.num_layers
            )));
        }
        if config.num_cell_groups == 0 {
            return Err(NasError::Config("num_cell_groups必须大于0".to_string()));
        }

        let cell_layout = match &config.cell_layout {
            Some(layout) => {
                if layout.len() != config.num_layers {
                    return Err(NasError::Config(format!(
                        "cell_layout长度{}与num_layers{}不一致",
                        layout.len(),
                        config.num_layers
                    )));
                }
                layout.clone()
            }
            None => {
                if config.num_cell_groups != 2 {
                    return Err(NasError::Config(format!(
                        "默认布局只适用于2个单元组，当前为{}个，请显式给出cell_layout",
                        config.num_cell_groups
                    )));
                }
                let mut layout = vec![0; config.num_layers];
                layout[config.num_layers / 3] = 1;
                layout[2 * config.num_layers / 3] = 1;
                layout
            }
        };
        if let Some(bad) = cell_layout
            .iter()
            .chain(&config.reduce_cell_groups)
            .find(|&&g| g >= config.num_cell_groups)
        {
            return Err(NasError::Config(format!(
                "单元组编号{bad}超出范围[0, {})",
                config.num_cell_groups
            )));
        }

        if config.shared_primitives.is_empty() {
            return Err(NasError::Config("shared_primitives不能为空".to_string()));
        }
        if let Some(unknown) = config
            .shared_primitives
            .iter()
            .find(|p| !PRIMITIVES.contains(&p.as_str()))
        {
            return Err(NasError::UnknownPrimitive(unknown.clone()));
        }

        Ok(Self {
            num_cell_groups: config.num_cell_groups,
            num_init_nodes: config.num_init_nodes,
            num_layers: config.num_layers,
            num_steps: config.num_steps,
            cell_layout,
            reduce_cell_groups: config.reduce_cell_groups.clone(),
            primitives: config.shared_primitives.clone(),
        })
    }

    pub const fn num_cell_groups(&self) -> usize {
        self.num_cell_groups
    }

    pub const fn num_init_nodes(&self) -> usize {
        self.num_init_nodes
    }

    pub const fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub const fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn cell_layout(&self) -> &[usize] {
        &self.cell_layout
    }

    pub fn primitives(&self) -> &[String] {
        &self.primitives
    }

    pub fn is_reduce_group(&self, group: usize) -> bool {
        self.reduce_cell_groups.contains(&group)
    }

    pub fn is_reduce_cell(&self, cell_idx: usize) -> bool {
        self.is_reduce_group(self.cell_layout[cell_idx])
    }

    /// 校验一组单元基因型（按单元组顺序）：
    /// - 数量与单元组数一致
    /// - 每条边满足`from < to`，且`to`落在中间节点范围内
    /// - 原语属于本搜索空间
    /// - 每个中间节点至少有一条入边
    pub fn validate_genotypes(&self, genotypes: &[Genotype]) -> Result<(), NasError> {
        if genotypes.len() != self.num_cell_groups {
            return Err(NasError::InvalidGenotype(format!(
                "需要{}个单元组的基因型，实际为{}个",
                self.num_cell_groups,
                genotypes.len()
            )));
        }
        let num_nodes = self.num_init_nodes + self.num_steps;
        for (group, genotype) in genotypes.iter().enumerate() {
            for edge in genotype {
                if edge.to < self.num_init_nodes || edge.to >= num_nodes || edge.from >= edge.to {
                    return Err(NasError::InvalidGenotype(format!(
                        "单元组{group}的边{edge}不合法：需满足from < to且{} <= to < {num_nodes}",
                        self.num_init_nodes
                    )));
                }
                if !self.primitives.contains(&edge.op_type) {
                    return Err(NasError::UnknownPrimitive(edge.op_type.clone()));
                }
            }
            if let Some(node) = (self.num_init_nodes..num_nodes)
                .find(|node| genotype.iter().all(|edge| edge.to != *node))
            {
                return Err(NasError::InvalidGenotype(format!(
                    "单元组{group}的节点{node}没有入边"
                )));
            }
        }
        Ok(())
    }
}

/*
 * @Description  : 基因型（genotype）与 rollout
 *
 * 一个基因型是某个单元组（cell group）内一组有序的边`(op_type, from, to)`；
 * 一个 rollout 给出每个单元组的基因型（可能夹带以`concat`为名的非单元条目）。
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::NasError;

/// 单元中的一条边：节点`from`经由原语`op_type`流向节点`to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub op_type: String,
    pub from: usize,
    pub to: usize,
}

impl Edge {
    pub fn new(op_type: &str, from: usize, to: usize) -> Self {
        Self {
            op_type: op_type.to_string(),
            from,
            to,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.op_type, self.from, self.to)
    }
}

pub type Genotype = Vec<Edge>;

/// 按目标节点分组：`(to, 该节点的入边)`，组按`to`升序，组内按`from`升序
pub type GroupedGenotype = Vec<(usize, Vec<Edge>)>;

/// 把基因型按目标节点分组并排序（排序稳定，`from`相同的边保持原有顺序）
pub fn group_and_sort_by_to_node(genotype: &[Edge]) -> GroupedGenotype {
    let mut edges = genotype.to_vec();
    edges.sort_by_key(|e| (e.to, e.from));
    let mut grouped: GroupedGenotype = Vec::new();
    for edge in edges {
        match grouped.last_mut() {
            Some((to, group)) if *to == edge.to => group.push(edge),
            _ => grouped.push((edge.to, vec![edge])),
        }
    }
    grouped
}

/// rollout 的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutType {
    /// 每条边选定唯一原语
    Discrete,
    /// 每条边上是原语的连续混合权重
    Differentiable,
}

impl fmt::Display for RolloutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrete => write!(f, "discrete"),
            Self::Differentiable => write!(f, "differentiable"),
        }
    }
}

impl FromStr for RolloutType {
    type Err = NasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discrete" => Ok(Self::Discrete),
            "differentiable" => Ok(Self::Differentiable),
            other => Err(NasError::UnsupportedRolloutType(other.to_string())),
        }
    }
}

/// 一次采样的结果：按单元组顺序排列的`(组标签, 基因型)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    genotypes: Vec<(String, Genotype)>,
    rollout_type: RolloutType,
}

impl Rollout {
    pub fn new(genotypes: Vec<(String, Genotype)>) -> Self {
        Self::with_type(genotypes, RolloutType::Discrete)
    }

    pub fn with_type(genotypes: Vec<(String, Genotype)>, rollout_type: RolloutType) -> Self {
        Self {
            genotypes,
            rollout_type,
        }
    }

    pub const fn rollout_type(&self) -> RolloutType {
        self.rollout_type
    }

    /// 全部条目（含`concat`条目）
    pub fn genotype_list(&self) -> &[(String, Genotype)] {
        &self.genotypes
    }

    /// 单元基因型：跳过标签中含`concat`的条目
    pub fn cell_genotypes(&self) -> Vec<Genotype> {
        self.genotypes
            .iter()
            .filter(|(label, _)| !label.contains("concat"))
            .map(|(_, genotype)| genotype.clone())
            .collect()
    }
}
